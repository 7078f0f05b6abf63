//! Non-linear least squares fitting of peak shape models against binned data.
//!
//! The [`CurveFitter`] trait is the seam between peak detection and the
//! numerical minimizer. [`LevenbergMarquardt`] is the implementation used by
//! default: a damped Gauss-Newton iteration over a chi-square loss where each
//! bin is weighted by the inverse of its count, with empty bins given unit
//! variance.
use std::fmt::Debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::linalg;
use crate::spectrum::HistogramLike;

/// A closed interval of the axis over which a model is fitted
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitDomain {
    pub low: f64,
    pub high: f64,
}

impl FitDomain {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// The domain `[center - half_width, center + half_width]`
    pub fn around(center: f64, half_width: f64) -> Self {
        Self::new(center - half_width, center + half_width)
    }

    #[inline]
    pub fn contains(&self, x: f64) -> bool {
        self.low <= x && x <= self.high
    }
}

/// Paired coordinate and count arrays to fit a model against
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FitArgs {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl FitArgs {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        assert_eq!(
            x.len(),
            y.len(),
            "x array length ({}) must equal y length ({})",
            x.len(),
            y.len()
        );
        Self { x, y }
    }

    /// Collect every bin of `hist` whose center lies inside `domain`
    pub fn from_histogram<H: HistogramLike>(hist: &H, domain: FitDomain) -> Self {
        let (x, y) = (1..=hist.len())
            .map(|bin| (hist.bin_center(bin), hist.content(bin)))
            .filter(|(x, _)| domain.contains(*x))
            .unzip();
        Self { x, y }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x.iter().copied().zip(self.y.iter().copied())
    }

    /// The index of the largest `y` value
    pub fn argmax(&self) -> usize {
        self.y
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(best_i, best), (i, y)| {
                if *y > best {
                    (i, *y)
                } else {
                    (best_i, best)
                }
            })
            .0
    }

    /// The average distance between consecutive `x` values
    pub fn average_spacing(&self) -> f64 {
        match (self.x.first(), self.x.last()) {
            (Some(first), Some(last)) if self.len() > 1 => (last - first) / (self.len() - 1) as f64,
            _ => 1.0,
        }
    }

    /// The chi-square weight for each observation
    fn weights(&self) -> Vec<f64> {
        self.y.iter().map(|y| 1.0 / y.max(1.0)).collect()
    }
}

/// A parametric curve which can be optimized by a [`CurveFitter`]
pub trait PeakShapeModel: Clone + Debug {
    /// The number of free parameters
    fn parameter_count(&self) -> usize;

    /// The current parameter vector
    fn parameters(&self) -> Vec<f64>;

    /// Replace the parameter vector, which has [`PeakShapeModel::parameter_count`] entries
    fn set_parameters(&mut self, params: &[f64]);

    /// Compute the theoretical value at `x`
    fn density(&self, x: f64) -> f64;

    /// Write the partial derivatives of [`PeakShapeModel::density`] with respect to
    /// each parameter at `x` into `out`
    fn parameter_gradient(&self, x: f64, out: &mut [f64]);

    /// Whether the parameters describe a usable curve
    fn is_valid(&self) -> bool;

    /// Estimate parameters from the observed data alone
    fn guess(_data: &FitArgs) -> Option<Self> {
        None
    }

    /// Map the parameters onto their canonical representation after fitting
    fn normalize(&mut self) {}

    /// Weighted sum of squared residuals
    fn chi_square(&self, data: &FitArgs, weights: &[f64]) -> f64 {
        data.iter()
            .zip(weights.iter())
            .map(|((x, y), w)| w * (y - self.density(x)).powi(2))
            .sum()
    }
}

/// Hyperparameters for fitting a peak shape model
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitConfig {
    /// The maximum number of iterations to attempt when fitting a peak model
    pub max_iter: usize,
    /// The relative loss improvement below which the model is considered converged
    pub convergence: f64,
    /// The starting damping factor
    pub initial_damping: f64,
    /// Also start from a data-driven parameter estimate and keep whichever fit
    /// reaches the lower loss, so a poor initial guess does not strand the fit.
    pub robust: bool,
}

impl FitConfig {
    /// The maximum number of iterations to attempt when fitting a peak model
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn convergence(mut self, convergence: f64) -> Self {
        self.convergence = convergence;
        self
    }

    pub fn initial_damping(mut self, initial_damping: f64) -> Self {
        self.initial_damping = initial_damping;
        self
    }

    pub fn robust(mut self, robust: bool) -> Self {
        self.robust = robust;
        self
    }
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iter: 200,
            convergence: 1e-10,
            initial_damping: 1e-3,
            robust: true,
        }
    }
}

/// Describe a model fitting procedure's output
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModelFitResult {
    /// The chi-square at the end of the optimization run
    pub loss: f64,
    /// The number of iterations run
    pub iterations: usize,
    /// Whether or not the model converged within the specified number of iterations
    pub converged: bool,
    /// Whether or not the model was able to fit *at all*
    pub success: bool,
}

impl ModelFitResult {
    pub fn new(loss: f64, iterations: usize, converged: bool, success: bool) -> Self {
        Self {
            loss,
            iterations,
            converged,
            success,
        }
    }

    /// The outcome of a fit that could not be attempted
    pub fn failed() -> Self {
        Self::new(f64::INFINITY, 0, false, false)
    }
}

/// Something that can optimize a [`PeakShapeModel`] against data.
///
/// Implementations must always return, handing back a best-effort model when
/// the minimization does not converge. Callers inspect [`ModelFitResult::success`]
/// and [`PeakShapeModel::is_valid`] rather than assuming success.
pub trait CurveFitter {
    /// Fit `model` to `data`, using its current parameters as the initial guess.
    fn fit_model<M: PeakShapeModel>(&self, data: &FitArgs, model: &mut M) -> ModelFitResult;

    /// Fit `model` to the bins of `hist` within `domain`
    fn fit_histogram<M: PeakShapeModel, H: HistogramLike>(
        &self,
        hist: &H,
        domain: FitDomain,
        model: &mut M,
    ) -> ModelFitResult {
        let data = FitArgs::from_histogram(hist, domain);
        self.fit_model(&data, model)
    }
}

const MAX_DAMPING: f64 = 1e16;
const MIN_DAMPING: f64 = 1e-12;
const DAMPING_ATTEMPTS: usize = 24;

/// A Levenberg-Marquardt least squares minimizer
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    pub config: FitConfig,
}

impl LevenbergMarquardt {
    pub fn new(config: FitConfig) -> Self {
        Self { config }
    }

    /// Accumulate `JᵗWJ` and `JᵗWr` at the current parameters
    fn normal_terms<M: PeakShapeModel>(
        model: &M,
        data: &FitArgs,
        weights: &[f64],
        n: usize,
    ) -> (Vec<f64>, Vec<f64>) {
        let mut jtj = vec![0.0; n * n];
        let mut jtr = vec![0.0; n];
        let mut gradient = vec![0.0; n];
        for ((x, y), w) in data.iter().zip(weights.iter()) {
            model.parameter_gradient(x, &mut gradient);
            let residual = y - model.density(x);
            for j in 0..n {
                jtr[j] += w * gradient[j] * residual;
                for k in 0..n {
                    jtj[j * n + k] += w * gradient[j] * gradient[k];
                }
            }
        }
        (jtj, jtr)
    }

    fn minimize<M: PeakShapeModel>(
        &self,
        data: &FitArgs,
        weights: &[f64],
        mut model: M,
    ) -> (M, ModelFitResult) {
        let n = model.parameter_count();
        let mut loss = model.chi_square(data, weights);
        if !loss.is_finite() {
            return (model, ModelFitResult::failed());
        }

        let mut damping = self.config.initial_damping;
        let mut iterations = 0;
        let mut converged = false;

        for it in 0..self.config.max_iter {
            iterations = it + 1;
            let (jtj, jtr) = Self::normal_terms(&model, data, weights, n);
            let params = model.parameters();

            let mut step = None;
            for _ in 0..DAMPING_ATTEMPTS {
                let mut damped = jtj.clone();
                for j in 0..n {
                    let d = damped[j * n + j];
                    damped[j * n + j] = if d > 0.0 { d * (1.0 + damping) } else { damping };
                }
                if let Some(delta) = linalg::solve(&damped, &jtr, n) {
                    let trial_params: Vec<f64> =
                        params.iter().zip(delta.iter()).map(|(p, d)| p + d).collect();
                    let mut trial = model.clone();
                    trial.set_parameters(&trial_params);
                    let trial_loss = trial.chi_square(data, weights);
                    if trial_loss.is_finite() && trial_loss <= loss {
                        step = Some((trial, trial_loss));
                        damping = (damping / 10.0).max(MIN_DAMPING);
                        break;
                    }
                }
                damping *= 10.0;
                if damping > MAX_DAMPING {
                    break;
                }
            }

            match step {
                Some((trial, trial_loss)) => {
                    let improvement = loss - trial_loss;
                    log::trace!("{it}: Loss = {trial_loss:0.6e}, damping = {damping:0.3e}");
                    model = trial;
                    loss = trial_loss;
                    if improvement <= self.config.convergence * (loss + 1e-12) {
                        converged = true;
                        break;
                    }
                }
                None => {
                    log::trace!("{it}: No downhill step found, stopping at loss {loss:0.6e}");
                    converged = true;
                    break;
                }
            }
        }

        model.normalize();
        let success = loss.is_finite() && model.is_valid();
        (model, ModelFitResult::new(loss, iterations, converged, success))
    }
}

impl CurveFitter for LevenbergMarquardt {
    fn fit_model<M: PeakShapeModel>(&self, data: &FitArgs, model: &mut M) -> ModelFitResult {
        if data.len() < model.parameter_count() {
            log::debug!(
                "Cannot fit {} parameters against {} points",
                model.parameter_count(),
                data.len()
            );
            return ModelFitResult::failed();
        }
        let weights = data.weights();

        let (mut best_model, mut best_result) = self.minimize(data, &weights, model.clone());

        if self.config.robust {
            if let Some(seed) = M::guess(data) {
                let (alt_model, alt_result) = self.minimize(data, &weights, seed);
                let better = alt_result.success
                    && (!best_result.success || alt_result.loss < best_result.loss);
                if better {
                    log::trace!(
                        "Data-driven start reached loss {:0.6e} < {:0.6e}",
                        alt_result.loss,
                        best_result.loss
                    );
                    best_model = alt_model;
                    best_result = alt_result;
                }
            }
        }

        *model = best_model;
        best_result
    }
}
