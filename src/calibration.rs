//! Channel to energy calibration from detected peak positions and a list of
//! known reference energies.
//!
//! Two strategies are available, see [`CalibrationMode`]:
//!
//! - A brute force search over a grid of linear mappings `energy = m * channel + b`,
//!   keeping the first mapping in scan order that places the most peaks within a
//!   fixed tolerance of *any* known energy. The best grid point can then be refined
//!   by a least squares line through the peak/energy pairs it matched.
//! - A least squares polynomial regression which pairs peaks and energies by rank,
//!   raising the polynomial degree while the coefficient of determination keeps
//!   improving.
use std::fmt;

use log::{debug, warn};
use num_traits::ToPrimitive;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::stepped;
use crate::linalg::least_squares;
use crate::peak::Peak;
use crate::spectrum::HistogramLike;

/// The strategy used to derive a [`CalibrationMapping`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CalibrationMode {
    /// Exhaustive search over a grid of slopes and intercepts
    #[default]
    LinearSearch,
    /// Ordinary least squares polynomial fit of rank-paired peaks and energies
    PolynomialRegression,
}

/// A function from channel to energy
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CalibrationMapping {
    Linear { slope: f64, intercept: f64 },
    /// Coefficients in increasing order of power, `[a0, a1, ..., aN]`
    Polynomial { coefficients: Vec<f64> },
}

impl CalibrationMapping {
    pub fn identity() -> Self {
        Self::Linear {
            slope: 1.0,
            intercept: 0.0,
        }
    }

    /// Evaluate the mapping at `channel`
    pub fn evaluate(&self, channel: f64) -> f64 {
        match self {
            Self::Linear { slope, intercept } => slope * channel + intercept,
            Self::Polynomial { coefficients } => coefficients
                .iter()
                .rev()
                .fold(0.0, |acc, c| acc * channel + c),
        }
    }

    /// Evaluate the first derivative of the mapping at `channel`
    pub fn derivative(&self, channel: f64) -> f64 {
        match self {
            Self::Linear { slope, .. } => *slope,
            Self::Polynomial { coefficients } => coefficients
                .iter()
                .enumerate()
                .skip(1)
                .rev()
                .fold(0.0, |acc, (power, c)| acc * channel + power as f64 * c),
        }
    }

    pub fn degree(&self) -> usize {
        match self {
            Self::Linear { .. } => 1,
            Self::Polynomial { coefficients } => coefficients.len().saturating_sub(1),
        }
    }

    /// The coefficients `[a0, a1, ...]` of the mapping
    pub fn coefficients(&self) -> Vec<f64> {
        match self {
            Self::Linear { slope, intercept } => vec![*intercept, *slope],
            Self::Polynomial { coefficients } => coefficients.clone(),
        }
    }
}

impl fmt::Display for CalibrationMapping {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Linear { slope, intercept } => {
                write!(f, "E = {slope:0.4} * ch + {intercept:0.4}")
            }
            Self::Polynomial { coefficients } => {
                write!(f, "E =")?;
                for (power, c) in coefficients.iter().enumerate() {
                    let sep = if power == 0 { "" } else { " +" };
                    match power {
                        0 => write!(f, "{sep} {c:0.6e}")?,
                        1 => write!(f, "{sep} {c:0.6e} * ch")?,
                        _ => write!(f, "{sep} {c:0.6e} * ch^{power}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// All the ways a calibration can fail
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("Only {found} peaks are available but at least {required} are required")]
    InsufficientPeaks { found: usize, required: usize },
    #[error("No reference energies were provided")]
    NoReferenceEnergies,
    #[error("No mapping in the search grid matched any peak to a known energy")]
    NoCalibrationMatch,
    #[error("The normal equations for a degree {degree} polynomial are singular")]
    SingularSystem { degree: usize },
    #[error("The degree {degree} fit has R² = {r_squared}, below the required {minimum}")]
    PoorFit {
        degree: usize,
        r_squared: f64,
        minimum: f64,
    },
    #[error("The degree {degree} fit produced out of range coefficients {coefficients:?}")]
    InvalidCoefficients {
        degree: usize,
        coefficients: Vec<f64>,
    },
}

/// The outcome of a successful calibration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Calibration {
    pub mapping: CalibrationMapping,
    pub mode: CalibrationMode,
    /// The number of peaks the mapping places within tolerance of a known energy
    pub match_count: usize,
    /// The coefficient of determination, for regression based calibrations
    pub r_squared: Option<f64>,
    /// Whether the number of peaks differed from the number of known energies
    pub count_mismatch: bool,
    /// Whether a grid search result was replaced by a least squares refinement
    pub refined: bool,
}

impl Calibration {
    /// Attach calibrated energies to every found peak in `peaks`, evaluating the
    /// mapping at the center of each peak's bin on `axis`.
    pub fn annotate<H: HistogramLike>(&self, peaks: &mut [Peak], axis: &H) {
        for peak in peaks.iter_mut() {
            peak.energy = if peak.is_found() {
                Some(self.mapping.evaluate(axis.bin_center(peak.peak_bin)))
            } else {
                None
            };
        }
    }

    pub fn evaluate(&self, channel: f64) -> f64 {
        self.mapping.evaluate(channel)
    }
}

/// Hyperparameters for calibration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibratorConfig {
    /// The first slope on the search grid
    pub slope_start: f64,
    pub slope_step: f64,
    /// The number of steps past `slope_start`
    pub slope_steps: usize,
    /// The first intercept on the search grid
    pub intercept_start: f64,
    pub intercept_step: f64,
    /// The number of steps past `intercept_start`
    pub intercept_steps: usize,
    /// How close a predicted energy must be to a known energy to count as a match
    pub tolerance: f64,
    /// Fit a least squares line through the pairs matched by the best grid point
    pub refine: bool,
    /// The highest polynomial degree to try
    pub max_degree: usize,
    /// The smallest acceptable coefficient of determination
    pub min_r_squared: f64,
    /// The gain in R² required to accept the next polynomial degree
    pub degree_improvement: f64,
    /// The largest magnitude allowed for any coefficient of order two or higher
    pub polynomial_fit_threshold: f64,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        Self {
            slope_start: 0.1,
            slope_step: 0.01,
            slope_steps: 990,
            intercept_start: 0.0,
            intercept_step: 0.1,
            intercept_steps: 50,
            tolerance: 10.0,
            refine: true,
            max_degree: 3,
            min_r_squared: 0.99,
            degree_improvement: 1e-4,
            polynomial_fit_threshold: 1.0,
        }
    }
}

impl CalibratorConfig {
    /// Set the slope grid to `start..=end` in increments of `step`
    pub fn slope_grid(mut self, start: f64, end: f64, step: f64) -> Self {
        self.slope_start = start;
        self.slope_step = step;
        self.slope_steps = ((end - start) / step).round().max(0.0) as usize;
        self
    }

    /// Set the intercept grid to `start..=end` in increments of `step`
    pub fn intercept_grid(mut self, start: f64, end: f64, step: f64) -> Self {
        self.intercept_start = start;
        self.intercept_step = step;
        self.intercept_steps = ((end - start) / step).round().max(0.0) as usize;
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn refine(mut self, refine: bool) -> Self {
        self.refine = refine;
        self
    }

    pub fn max_degree(mut self, max_degree: usize) -> Self {
        self.max_degree = max_degree;
        self
    }

    pub fn min_r_squared(mut self, min_r_squared: f64) -> Self {
        self.min_r_squared = min_r_squared;
        self
    }

    pub fn degree_improvement(mut self, degree_improvement: f64) -> Self {
        self.degree_improvement = degree_improvement;
        self
    }

    pub fn polynomial_fit_threshold(mut self, polynomial_fit_threshold: f64) -> Self {
        self.polynomial_fit_threshold = polynomial_fit_threshold;
        self
    }
}

/// Derive channel to energy mappings from peak positions
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Calibrator {
    pub mode: CalibrationMode,
    pub config: CalibratorConfig,
}

impl Calibrator {
    pub fn new(mode: CalibrationMode, config: CalibratorConfig) -> Self {
        Self { mode, config }
    }

    /// Calibrate `peak_positions` against `known_energies` with the configured mode.
    ///
    /// The positions are channel coordinates, the same coordinates the mapping will
    /// later be evaluated at. `known_energies` is expected in ascending order. Only as
    /// many energies as there are peaks are used.
    pub fn calibrate<T: ToPrimitive>(
        &self,
        peak_positions: &[T],
        known_energies: &[f64],
    ) -> Result<Calibration, CalibrationError> {
        let peak_positions: Vec<f64> = peak_positions
            .iter()
            .filter_map(|p| p.to_f64())
            .filter(|p| p.is_finite())
            .collect();
        let peak_positions = peak_positions.as_slice();
        if peak_positions.len() < 2 {
            return Err(CalibrationError::InsufficientPeaks {
                found: peak_positions.len(),
                required: 2,
            });
        }
        if known_energies.is_empty() {
            return Err(CalibrationError::NoReferenceEnergies);
        }
        let count_mismatch = peak_positions.len() != known_energies.len();
        if count_mismatch {
            warn!(
                "Calibrating {} peaks against {} known energies, using the first {}",
                peak_positions.len(),
                known_energies.len(),
                peak_positions.len().min(known_energies.len())
            );
        }
        let known_energies = &known_energies[..known_energies.len().min(peak_positions.len())];
        let mut calibration = match self.mode {
            CalibrationMode::LinearSearch => self.linear_search(peak_positions, known_energies),
            CalibrationMode::PolynomialRegression => {
                self.polynomial_regression(peak_positions, known_energies)
            }
        }?;
        calibration.count_mismatch = count_mismatch;
        debug!(
            "Calibrated with {} ({} of {} peaks matched)",
            calibration.mapping,
            calibration.match_count,
            peak_positions.len()
        );
        Ok(calibration)
    }

    #[inline]
    fn nearest_energy(&self, predicted: f64, known_energies: &[f64]) -> Option<f64> {
        known_energies
            .iter()
            .copied()
            .min_by(|a, b| (predicted - a).abs().total_cmp(&(predicted - b).abs()))
            .filter(|e| (predicted - e).abs() < self.config.tolerance)
    }

    /// Count the peaks that `mapping` places within tolerance of a known energy
    pub fn count_matches(
        &self,
        mapping: &CalibrationMapping,
        peak_positions: &[f64],
        known_energies: &[f64],
    ) -> usize {
        peak_positions
            .iter()
            .filter(|p| {
                self.nearest_energy(mapping.evaluate(**p), known_energies)
                    .is_some()
            })
            .count()
    }

    /// Search the configured slope and intercept grid for the mapping matching
    /// the most peaks to known energies.
    pub fn linear_search(
        &self,
        channels: &[f64],
        known_energies: &[f64],
    ) -> Result<Calibration, CalibrationError> {
        let config = &self.config;

        let mut best_count = 0;
        let mut best_slope = 0.0;
        let mut best_intercept = 0.0;

        'search: for slope in stepped(config.slope_start, config.slope_step, config.slope_steps) {
            for intercept in stepped(
                config.intercept_start,
                config.intercept_step,
                config.intercept_steps,
            ) {
                let count = channels
                    .iter()
                    .filter(|c| {
                        self.nearest_energy(slope * **c + intercept, known_energies)
                            .is_some()
                    })
                    .count();
                if count > best_count {
                    best_count = count;
                    best_slope = slope;
                    best_intercept = intercept;
                }
                if best_count == channels.len() {
                    break 'search;
                }
            }
        }

        if best_count == 0 {
            return Err(CalibrationError::NoCalibrationMatch);
        }

        let mapping = CalibrationMapping::Linear {
            slope: best_slope,
            intercept: best_intercept,
        };
        debug!("Best grid mapping {mapping} matched {best_count} peaks");

        let mut calibration = Calibration {
            mapping,
            mode: CalibrationMode::LinearSearch,
            match_count: best_count,
            r_squared: None,
            count_mismatch: false,
            refined: false,
        };

        if config.refine {
            if let Some((refined, r_squared)) =
                self.refine_linear(&calibration.mapping, channels, known_energies)
            {
                let count = self.count_matches(&refined, channels, known_energies);
                if count >= best_count {
                    calibration.mapping = refined;
                    calibration.match_count = count;
                    calibration.r_squared = Some(r_squared);
                    calibration.refined = true;
                }
            }
        }
        Ok(calibration)
    }

    /// Fit a least squares line through the peaks matched by `mapping` and the
    /// known energies they were matched to.
    fn refine_linear(
        &self,
        mapping: &CalibrationMapping,
        channels: &[f64],
        known_energies: &[f64],
    ) -> Option<(CalibrationMapping, f64)> {
        let (xs, ys): (Vec<f64>, Vec<f64>) = channels
            .iter()
            .filter_map(|c| {
                self.nearest_energy(mapping.evaluate(*c), known_energies)
                    .map(|e| (*c, e))
            })
            .unzip();
        let distinct = xs.windows(2).any(|w| w[0] != w[1]);
        if xs.len() < 2 || !distinct {
            return None;
        }
        let coefficients = fit_polynomial(&xs, &ys, 1)?;
        let r2 = r_squared(&xs, &ys, &coefficients);
        Some((
            CalibrationMapping::Linear {
                slope: coefficients[1],
                intercept: coefficients[0],
            },
            r2,
        ))
    }

    /// Fit a polynomial through peaks and energies paired by rank, choosing
    /// the degree by how much each extra term improves R².
    pub fn polynomial_regression(
        &self,
        peak_positions: &[f64],
        known_energies: &[f64],
    ) -> Result<Calibration, CalibrationError> {
        let config = &self.config;
        let n = peak_positions.len().min(known_energies.len());
        if n < 2 {
            return Err(CalibrationError::InsufficientPeaks {
                found: n,
                required: 2,
            });
        }

        let mut channels: Vec<f64> = peak_positions.to_vec();
        channels.sort_by(f64::total_cmp);
        channels.truncate(n);
        let mut energies: Vec<f64> = known_energies.to_vec();
        energies.sort_by(f64::total_cmp);
        energies.truncate(n);

        let mut selected: Option<(usize, Vec<f64>, f64)> = None;
        for degree in 1..=config.max_degree.max(1) {
            if degree > 1 && n < degree + 2 {
                break;
            }
            let Some(coefficients) = fit_polynomial(&channels, &energies, degree) else {
                if degree == 1 {
                    return Err(CalibrationError::SingularSystem { degree });
                }
                debug!("Degree {degree} normal equations are singular, keeping degree {}", degree - 1);
                break;
            };
            let r2 = r_squared(&channels, &energies, &coefficients);
            debug!("Degree {degree} fit R² = {r2}");
            match &selected {
                None => selected = Some((degree, coefficients, r2)),
                Some((_, _, previous)) => {
                    if r2 - previous > config.degree_improvement {
                        selected = Some((degree, coefficients, r2));
                    } else {
                        break;
                    }
                }
            }
        }

        let (degree, coefficients, r2) = selected.ok_or(CalibrationError::SingularSystem { degree: 1 })?;
        if !(r2 >= config.min_r_squared) {
            warn!("Rejecting degree {degree} calibration with R² = {r2}");
            return Err(CalibrationError::PoorFit {
                degree,
                r_squared: r2,
                minimum: config.min_r_squared,
            });
        }
        if !self.coefficients_valid(&coefficients) {
            warn!("Rejecting degree {degree} calibration with coefficients {coefficients:?}");
            return Err(CalibrationError::InvalidCoefficients {
                degree,
                coefficients,
            });
        }

        let mapping = CalibrationMapping::Polynomial { coefficients };
        let match_count = channels
            .iter()
            .zip(energies.iter())
            .filter(|(c, e)| (mapping.evaluate(**c) - **e).abs() < config.tolerance)
            .count();

        Ok(Calibration {
            mapping,
            mode: CalibrationMode::PolynomialRegression,
            match_count,
            r_squared: Some(r2),
            count_mismatch: false,
            refined: false,
        })
    }

    fn coefficients_valid(&self, coefficients: &[f64]) -> bool {
        coefficients.iter().all(|c| c.is_finite())
            && coefficients
                .iter()
                .skip(2)
                .all(|c| c.abs() <= self.config.polynomial_fit_threshold)
    }
}

/// Least squares polynomial coefficients `[a0, ..., a_degree]` for `ys` over `xs`
pub fn fit_polynomial(xs: &[f64], ys: &[f64], degree: usize) -> Option<Vec<f64>> {
    let terms = degree + 1;
    let design: Vec<Vec<f64>> = xs
        .iter()
        .map(|x| {
            let mut row = Vec::with_capacity(terms);
            let mut power = 1.0;
            for _ in 0..terms {
                row.push(power);
                power *= x;
            }
            row
        })
        .collect();
    least_squares(&design, ys, terms)
}

/// The coefficient of determination `1 - SSres / SStot` of the polynomial
/// `coefficients` against `ys` over `xs`
pub fn r_squared(xs: &[f64], ys: &[f64], coefficients: &[f64]) -> f64 {
    let mapping = CalibrationMapping::Polynomial {
        coefficients: coefficients.to_vec(),
    };
    let n = ys.len() as f64;
    let mean = ys.iter().sum::<f64>() / n;
    let ss_res: f64 = xs
        .iter()
        .zip(ys.iter())
        .map(|(x, y)| (y - mapping.evaluate(*x)).powi(2))
        .sum();
    let ss_tot: f64 = ys.iter().map(|y| (y - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}
