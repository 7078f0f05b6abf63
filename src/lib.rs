//! `gammacal` is a library for locating photopeaks in gamma-ray spectra and
//! calibrating detector channels against known reference energies.
//!
//! Peaks are found one at a time with [`PeakDetector`], which picks the bin
//! standing highest above its local background, fits a Gaussian on a linear
//! background there and strips the fitted region from a working copy before
//! looking for the next one. The peak positions are then handed to a
//! [`Calibrator`], which searches for a linear channel to energy mapping or fits
//! a polynomial one, and the mapping can be used to resample the spectrum with
//! [`apply_calibration`].
//!
//! A two dimensional matrix with one spectrum per detector channel can be run
//! through all of these steps at once with [`pipeline::ColumnProcessor`].
//!
//! # Usage
//! ```
//! use gammacal::{find_peaks, Calibrator, Spectrum};
//!
//! let mut counts = vec![0.0; 100];
//! counts[48] = 5.0;
//! counts[49] = 50.0;
//! counts[50] = 5.0;
//! let spectrum = Spectrum::from_counts(&counts);
//!
//! let peaks = find_peaks(&spectrum, 1).unwrap();
//! assert_eq!(peaks[0].peak_bin, 50);
//!
//! let calibration = Calibrator::default()
//!     .calibrate(&[10, 20, 30], &[100.0, 200.0, 300.0])
//!     .unwrap();
//! assert_eq!(calibration.match_count, 3);
//! ```
//! ## Building
//! The dense solves behind curve fitting and polynomial calibration use `nalgebra`
//! by default. A LAPACK backend through `ndarray-linalg` can be used instead by
//! enabling one of the `openblas`, `netlib` or `intel-mkl` features.
pub mod arrayops;
pub mod calibration;
pub mod fitter;
pub mod linalg;
pub mod peak;
pub mod peak_detector;
pub mod peak_shape;
pub mod pipeline;
pub mod prelude;
pub mod resample;
pub mod sources;
pub mod spectrum;
pub mod text;

#[cfg(test)]
mod test_data;

pub use crate::calibration::{
    Calibration, CalibrationError, CalibrationMapping, CalibrationMode, Calibrator,
    CalibratorConfig,
};
pub use crate::fitter::{CurveFitter, FitConfig, LevenbergMarquardt, ModelFitResult};
pub use crate::peak::{Peak, PeakReport};
pub use crate::peak_detector::{
    find_peaks, DetectorError, FitDiagnostics, PeakDetector, PeakDetectorBuilder,
};
pub use crate::peak_shape::GaussianPeakShape;
pub use crate::resample::{apply_calibration, ResampleError, ResampledSpectrum};
pub use crate::sources::KnownEnergies;
pub use crate::spectrum::{HistogramLike, Spectrum, SpectrumMatrix};
