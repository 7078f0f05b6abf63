//! Synthetic spectra shared by the unit tests.
use crate::fitter::PeakShapeModel;
use crate::peak_shape::GaussianPeakShape;
use crate::spectrum::{Spectrum, SpectrumMatrix};

/// A unit-width spectrum of `n_bins` holding a noiseless Gaussian on a flat
/// background, evaluated at the bin centers.
pub fn gaussian_on_background(
    n_bins: usize,
    amplitude: f64,
    mu: f64,
    sigma: f64,
    background: f64,
) -> Spectrum {
    let model = GaussianPeakShape::new(amplitude, mu, sigma, background, 0.0);
    let counts: Vec<f64> = (0..n_bins).map(|i| model.density(i as f64 + 0.5)).collect();
    Spectrum::from_counts(&counts)
}

/// Zeros everywhere except `[side, peak, side]` centered on the 1-based `center_bin`
pub fn three_bin_spike(n_bins: usize, center_bin: usize, side: f64, peak: f64) -> Spectrum {
    let mut counts = vec![0.0; n_bins];
    counts[center_bin - 2] = side;
    counts[center_bin - 1] = peak;
    counts[center_bin] = side;
    Spectrum::from_counts(&counts)
}

/// A strong and a weaker well separated Gaussian on a flat background of 10
pub fn two_peaks(n_bins: usize) -> Spectrum {
    let strong = GaussianPeakShape::new(1000.0, 80.5, 2.0, 10.0, 0.0);
    let weak = GaussianPeakShape::new(400.0, 200.5, 2.5, 0.0, 0.0);
    let counts: Vec<f64> = (0..n_bins)
        .map(|i| {
            let x = i as f64 + 0.5;
            strong.density(x) + weak.density(x)
        })
        .collect();
    Spectrum::from_counts(&counts)
}

/// A spectrum holding one Gaussian per entry of `peaks`, each `(amplitude, mu, sigma)`,
/// on a flat background.
pub fn line_spectrum(n_bins: usize, peaks: &[(f64, f64, f64)], background: f64) -> Spectrum {
    let models: Vec<GaussianPeakShape> = peaks
        .iter()
        .map(|(a, mu, sigma)| GaussianPeakShape::new(*a, *mu, *sigma, 0.0, 0.0))
        .collect();
    let counts: Vec<f64> = (0..n_bins)
        .map(|i| {
            let x = i as f64 + 0.5;
            background + models.iter().map(|m| m.density(x)).sum::<f64>()
        })
        .collect();
    Spectrum::from_counts(&counts)
}

/// A matrix whose columns each hold `column` and whose last column is empty
pub fn matrix_of(column: &Spectrum, n_columns: usize) -> SpectrumMatrix {
    let mut matrix =
        SpectrumMatrix::new(n_columns + 1, column.counts().len(), column.x_min, column.x_max)
            .unwrap();
    for c in 1..=n_columns {
        matrix.set_column(c, column);
    }
    matrix
}
