use std::f64::consts::{PI, SQRT_2};
use std::fmt;

use libm::erf;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::fitter::{FitArgs, PeakShapeModel};

/// The ratio between the full width at half maximum and sigma of a Gaussian
pub const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949;

/// Gaussian peak shape on top of a linear background
///
/// ```math
/// y = a\exp\left({\frac{-(x - \mu)^2}{2\sigma^2}}\right) + c_0 + c_1 x
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GaussianPeakShape {
    pub amplitude: f64,
    pub mu: f64,
    pub sigma: f64,
    /// The constant background term
    pub offset: f64,
    /// The linear background term
    pub slope: f64,
}

impl GaussianPeakShape {
    pub fn new(amplitude: f64, mu: f64, sigma: f64, offset: f64, slope: f64) -> Self {
        Self {
            amplitude,
            mu,
            sigma,
            offset,
            slope,
        }
    }

    /// The background contribution at `x`
    #[inline]
    pub fn background(&self, x: f64) -> f64 {
        self.offset + self.slope * x
    }

    /// The Gaussian contribution at `x`
    #[inline]
    pub fn signal(&self, x: f64) -> f64 {
        self.amplitude * (-0.5 * ((x - self.mu) / self.sigma).powi(2)).exp()
    }

    /// Integrate the complete model, background included, over `[low, high]`
    pub fn integral(&self, low: f64, high: f64) -> f64 {
        let scale = self.sigma * SQRT_2;
        let gaussian = self.amplitude
            * self.sigma
            * (PI / 2.0).sqrt()
            * (erf((high - self.mu) / scale) - erf((low - self.mu) / scale));
        let background =
            self.offset * (high - low) + self.slope * (high.powi(2) - low.powi(2)) / 2.0;
        gaussian + background
    }

    /// The model integral over `[μ - 2σ, μ + 2σ]`, or `None` when the model is unusable
    pub fn area(&self) -> Option<f64> {
        if !self.is_valid() {
            return None;
        }
        Some(self.integral(self.mu - 2.0 * self.sigma, self.mu + 2.0 * self.sigma))
    }

    /// The relative width `σ / μ`, or `None` when the model is unusable
    pub fn resolution(&self) -> Option<f64> {
        if !self.is_valid() || self.mu == 0.0 {
            return None;
        }
        Some(self.sigma / self.mu)
    }

    pub fn full_width_at_half_max(&self) -> f64 {
        FWHM_PER_SIGMA * self.sigma
    }
}

impl PeakShapeModel for GaussianPeakShape {
    fn parameter_count(&self) -> usize {
        5
    }

    fn parameters(&self) -> Vec<f64> {
        vec![self.amplitude, self.mu, self.sigma, self.offset, self.slope]
    }

    fn set_parameters(&mut self, params: &[f64]) {
        self.amplitude = params[0];
        self.mu = params[1];
        self.sigma = params[2];
        self.offset = params[3];
        self.slope = params[4];
    }

    #[inline]
    fn density(&self, x: f64) -> f64 {
        self.signal(x) + self.background(x)
    }

    fn parameter_gradient(&self, x: f64, out: &mut [f64]) {
        let delta = x - self.mu;
        let sigma_squared = self.sigma.powi(2);
        let shape = (-0.5 * delta.powi(2) / sigma_squared).exp();
        let scaled = self.amplitude * shape;
        out[0] = shape;
        out[1] = scaled * delta / sigma_squared;
        out[2] = scaled * delta.powi(2) / (sigma_squared * self.sigma);
        out[3] = 1.0;
        out[4] = x;
    }

    fn is_valid(&self) -> bool {
        self.sigma > 0.0
            && self.amplitude.is_finite()
            && self.mu.is_finite()
            && self.sigma.is_finite()
            && self.offset.is_finite()
            && self.slope.is_finite()
    }

    /// Moment estimate above the smallest observed value
    fn guess(data: &FitArgs) -> Option<Self> {
        if data.is_empty() {
            return None;
        }
        let baseline = data.y.iter().copied().fold(f64::INFINITY, f64::min);
        let (total, weighted_x) = data.iter().fold((0.0, 0.0), |(total, acc), (x, y)| {
            let w = y - baseline;
            (total + w, acc + w * x)
        });
        if total <= 0.0 || !total.is_finite() {
            return None;
        }
        let mu = weighted_x / total;
        let variance = data
            .iter()
            .map(|(x, y)| (y - baseline) * (x - mu).powi(2))
            .sum::<f64>()
            / total;
        let mut sigma = variance.sqrt();
        if !(sigma > 0.0) {
            sigma = data.average_spacing() / 2.0;
        }
        let amplitude = data.y[data.argmax()] - baseline;
        Some(Self::new(amplitude, mu, sigma, baseline, 0.0))
    }

    fn normalize(&mut self) {
        self.sigma = self.sigma.abs();
    }
}

impl fmt::Display for GaussianPeakShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GaussianPeakShape({:0.4}, {:0.4}, {:0.4}, {:0.4}, {:0.4})",
            self.amplitude, self.mu, self.sigma, self.offset, self.slope
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_area_matches_closed_form() {
        let model = GaussianPeakShape::new(100.0, 50.0, 2.0, 0.0, 0.0);
        // 2σ holds erf(√2) of the full Gaussian area
        let expected = 100.0 * 2.0 * (2.0 * PI).sqrt() * erf(SQRT_2);
        assert!((model.area().unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_area_includes_background() {
        let model = GaussianPeakShape::new(0.0, 50.0, 2.0, 3.0, 0.5);
        // ∫ 3 + 0.5x over [46, 54]
        let expected = 3.0 * 8.0 + 0.25 * (54.0f64.powi(2) - 46.0f64.powi(2));
        assert!((model.area().unwrap() - expected).abs() < 1e-9);
    }

    #[rstest]
    #[case(GaussianPeakShape::new(10.0, 50.0, 0.0, 0.0, 0.0))]
    #[case(GaussianPeakShape::new(10.0, 50.0, -1.0, 0.0, 0.0))]
    #[case(GaussianPeakShape::new(10.0, f64::NAN, 1.0, 0.0, 0.0))]
    fn test_invalid_models_are_not_computable(#[case] model: GaussianPeakShape) {
        assert!(!model.is_valid());
        assert_eq!(model.area(), None);
        assert_eq!(model.resolution(), None);
    }

    #[test]
    fn test_resolution() {
        let model = GaussianPeakShape::new(10.0, 200.0, 4.0, 0.0, 0.0);
        assert_eq!(model.resolution(), Some(0.02));
        let at_origin = GaussianPeakShape::new(10.0, 0.0, 4.0, 0.0, 0.0);
        assert_eq!(at_origin.resolution(), None);
        assert!(at_origin.area().is_some());
        assert!((model.full_width_at_half_max() - 9.419280180123796).abs() < 1e-9);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let model = GaussianPeakShape::new(120.0, 30.0, 1.7, 4.0, 0.1);
        let x = 31.2;
        let mut analytic = [0.0; 5];
        model.parameter_gradient(x, &mut analytic);
        let params = model.parameters();
        for j in 0..5 {
            let h = 1e-6 * params[j].abs().max(1.0);
            let mut up = params.clone();
            up[j] += h;
            let mut down = params.clone();
            down[j] -= h;
            let mut m_up = model;
            m_up.set_parameters(&up);
            let mut m_down = model;
            m_down.set_parameters(&down);
            let numeric = (m_up.density(x) - m_down.density(x)) / (2.0 * h);
            assert!(
                (numeric - analytic[j]).abs() < 1e-4 * analytic[j].abs().max(1.0),
                "parameter {j}: {numeric} vs {}",
                analytic[j]
            );
        }
    }

    #[test]
    fn test_guess() {
        let x: Vec<f64> = (0..21).map(|i| i as f64).collect();
        let truth = GaussianPeakShape::new(50.0, 10.0, 2.0, 5.0, 0.0);
        let y = x.iter().map(|x| truth.density(*x)).collect();
        let guess = GaussianPeakShape::guess(&FitArgs::new(x, y)).unwrap();
        assert!((guess.mu - 10.0).abs() < 1e-9);
        assert!((guess.sigma - 2.0).abs() < 0.1);
        assert!((guess.offset - 5.0).abs() < 0.01);
        assert!(GaussianPeakShape::guess(&FitArgs::default()).is_none());
    }
}
