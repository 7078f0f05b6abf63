//! Algorithm for finding the strongest peaks in a spectrum iteratively, stripping
//! each one from a working copy so weaker peaks surface on the next pass.
//!
use std::ops;

use log::debug;

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::fitter::{CurveFitter, FitDomain, LevenbergMarquardt, ModelFitResult, PeakShapeModel};
use crate::peak::{Peak, SuppressionWindow};
use crate::peak_shape::GaussianPeakShape;
use crate::spectrum::HistogramLike;

/// Running counts describing how detection went, accumulated across calls and
/// merged across columns at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitDiagnostics {
    /// Peaks whose fitted width put the left edge of the suppression window
    /// within bounds
    pub good_fits: u64,
    /// Peaks whose left window edge had to be replaced
    pub bad_fits: u64,
    /// The number of non-empty candidate bins examined while scanning
    pub scanned_bins: u64,
}

impl FitDiagnostics {
    pub fn merge(&mut self, other: &FitDiagnostics) {
        self.good_fits += other.good_fits;
        self.bad_fits += other.bad_fits;
        self.scanned_bins += other.scanned_bins;
    }
}

impl ops::Add for FitDiagnostics {
    type Output = FitDiagnostics;

    fn add(mut self, rhs: Self) -> Self::Output {
        self.merge(&rhs);
        self
    }
}

impl ops::AddAssign for FitDiagnostics {
    fn add_assign(&mut self, rhs: Self) {
        self.merge(&rhs);
    }
}

/// All the ways peak detection can fail
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectorError {
    #[error("At least one peak must be requested")]
    NoPeaksRequested,
    #[error("The minimum distance ({min}) must be at least 1 and no larger than the maximum distance ({max})")]
    InvalidDistances { min: usize, max: usize },
    #[error("The working copy has {working} bins but the main spectrum has {main}")]
    LengthMismatch { working: usize, main: usize },
    #[error("Bin {bin} is outside of the spectrum's {len} bins")]
    BinOutOfRange { bin: usize, len: usize },
}

/// The peaks found by [`PeakDetector::detect_peaks`] together with the stripped working copy
#[derive(Debug, Clone)]
pub struct PeakDetection<H: HistogramLike> {
    pub peaks: Vec<Peak>,
    pub working_copy: H,
}

/// A peak detector for binned spectra
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakDetector {
    /// The number of peak slots to fill
    pub number_of_peaks: usize,
    /// The offset, in bins, at which the local background is sampled, and the
    /// smallest half-width a suppression window may have
    pub min_distance: usize,
    /// The largest half-width a suppression window may have
    pub max_distance: usize,
    /// Half the width of the fit domain around the peak, in axis units
    pub fit_half_width: f64,
    /// The starting sigma handed to the curve fitter
    pub initial_sigma: f64,
}

impl Default for PeakDetector {
    fn default() -> Self {
        Self {
            number_of_peaks: 1,
            min_distance: 4,
            max_distance: 10,
            fit_half_width: 10.0,
            initial_sigma: 0.1,
        }
    }
}

/// A builder for configuring [`PeakDetector`]
#[derive(Debug, Clone, Default)]
pub struct PeakDetectorBuilder {
    detector: PeakDetector,
}

impl PeakDetectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn number_of_peaks(&mut self, number_of_peaks: usize) -> &mut Self {
        self.detector.number_of_peaks = number_of_peaks;
        self
    }

    pub fn min_distance(&mut self, min_distance: usize) -> &mut Self {
        self.detector.min_distance = min_distance;
        self
    }

    pub fn max_distance(&mut self, max_distance: usize) -> &mut Self {
        self.detector.max_distance = max_distance;
        self
    }

    pub fn fit_half_width(&mut self, fit_half_width: f64) -> &mut Self {
        self.detector.fit_half_width = fit_half_width;
        self
    }

    pub fn initial_sigma(&mut self, initial_sigma: f64) -> &mut Self {
        self.detector.initial_sigma = initial_sigma;
        self
    }

    pub fn build(&self) -> PeakDetector {
        self.detector.clone()
    }
}

impl From<PeakDetectorBuilder> for PeakDetector {
    fn from(value: PeakDetectorBuilder) -> Self {
        value.build()
    }
}

impl PeakDetector {
    pub fn new(number_of_peaks: usize, min_distance: usize, max_distance: usize) -> Self {
        Self {
            number_of_peaks,
            min_distance,
            max_distance,
            ..Self::default()
        }
    }

    pub fn builder() -> PeakDetectorBuilder {
        PeakDetectorBuilder::new()
    }

    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.number_of_peaks == 0 {
            return Err(DetectorError::NoPeaksRequested);
        }
        if self.min_distance == 0 || self.min_distance > self.max_distance {
            return Err(DetectorError::InvalidDistances {
                min: self.min_distance,
                max: self.max_distance,
            });
        }
        Ok(())
    }

    /// Detect [`PeakDetector::number_of_peaks`] peaks in `main`, stripping them from a
    /// fresh working copy which is returned alongside the peaks.
    pub fn detect_peaks<H: HistogramLike, F: CurveFitter>(
        &self,
        main: &H,
        fitter: &F,
        diagnostics: &mut FitDiagnostics,
    ) -> Result<PeakDetection<H>, DetectorError> {
        let mut working_copy = main.clone();
        let peaks = self.detect_peaks_in(&mut working_copy, main, fitter, diagnostics)?;
        Ok(PeakDetection {
            peaks,
            working_copy,
        })
    }

    /// Fill every peak slot, scanning `working` for candidates and fitting them
    /// against the unmodified `main` spectrum.
    ///
    /// Always returns exactly [`PeakDetector::number_of_peaks`] peaks. Slots for
    /// which no candidate remained hold [`Peak::not_found`].
    pub fn detect_peaks_in<H: HistogramLike, F: CurveFitter>(
        &self,
        working: &mut H,
        main: &H,
        fitter: &F,
        diagnostics: &mut FitDiagnostics,
    ) -> Result<Vec<Peak>, DetectorError> {
        self.validate()?;
        if working.len() != main.len() {
            return Err(DetectorError::LengthMismatch {
                working: working.len(),
                main: main.len(),
            });
        }

        let mut peaks = Vec::with_capacity(self.number_of_peaks);
        for slot in 0..self.number_of_peaks {
            let Some((peak_bin, amplitude)) = self.find_candidate(working, main, diagnostics)
            else {
                debug!("Slot {slot}: no candidate bins remain");
                peaks.push(Peak::not_found(slot));
                continue;
            };

            let (model, fit) = self.fit_at(main, peak_bin, amplitude, fitter);
            let window = self.suppression_window(peak_bin, &model, &fit, main.len());
            if window.left_clamped {
                diagnostics.bad_fits += 1;
            } else {
                diagnostics.good_fits += 1;
            }
            debug!(
                "Slot {slot}: peak at bin {peak_bin} fitted as {model}, suppressing {}..={}",
                window.left, window.right
            );
            for bin in window.bins() {
                working.set_content(bin, 0.0);
            }

            let mut peak = Peak::new(slot, peak_bin, model, fit);
            peak.window = Some(window);
            peaks.push(peak);
        }
        Ok(peaks)
    }

    /// Scan the non-empty bins of `working` for the one standing highest above
    /// the local background of `main`, returning the bin and its content.
    fn find_candidate<H: HistogramLike>(
        &self,
        working: &H,
        main: &H,
        diagnostics: &mut FitDiagnostics,
    ) -> Option<(usize, f64)> {
        let offset = self.min_distance as i64;
        let mut best_height = 0.0;
        let mut best = None;
        for bin in 1..=working.len() {
            let content = working.content(bin);
            if content == 0.0 {
                continue;
            }
            diagnostics.scanned_bins += 1;
            let background =
                (main.content_at_offset(bin, -offset) + main.content_at_offset(bin, offset)) / 2.0;
            let height = content - background;
            if height > best_height {
                best_height = height;
                best = Some((bin, content));
            }
        }
        best
    }

    /// Fit a peak shape on `main` centered on `peak_bin`
    pub fn fit_at<H: HistogramLike, F: CurveFitter>(
        &self,
        main: &H,
        peak_bin: usize,
        amplitude: f64,
        fitter: &F,
    ) -> (GaussianPeakShape, ModelFitResult) {
        let peak_x = main.bin_center(peak_bin);
        let mut model = GaussianPeakShape::new(amplitude, peak_x, self.initial_sigma, 0.0, 0.0);
        let domain = FitDomain::around(peak_x, self.fit_half_width);
        let fit = fitter.fit_histogram(main, domain, &mut model);
        if !fit.success {
            debug!("Fit at bin {peak_bin} did not produce a usable model: {fit:?}");
        }
        (model, fit)
    }

    /// Compute the bins to zero out around `peak_bin` from the fitted model.
    ///
    /// Each edge sits at `μ ∓ 2σ` unless that puts it closer than
    /// [`PeakDetector::min_distance`] or further than [`PeakDetector::max_distance`]
    /// from `peak_bin`, in which case it is moved to `peak_bin ∓ min_distance`.
    /// An unusable fit places both edges that way.
    pub fn suppression_window(
        &self,
        peak_bin: usize,
        model: &GaussianPeakShape,
        fit: &ModelFitResult,
        n_bins: usize,
    ) -> SuppressionWindow {
        let center = peak_bin as f64;
        let min_distance = self.min_distance as f64;
        let max_distance = self.max_distance as f64;
        let usable = fit.success && model.is_valid();

        let clamp_edge = |edge: f64, fallback: f64| -> (f64, bool) {
            if !usable {
                return (fallback, true);
            }
            let distance = (edge - center).abs();
            if distance > max_distance || distance < min_distance {
                (fallback, true)
            } else {
                (edge, false)
            }
        };

        let (left, left_clamped) =
            clamp_edge(model.mu - 2.0 * model.sigma, center - min_distance);
        let (right, right_clamped) =
            clamp_edge(model.mu + 2.0 * model.sigma, center + min_distance);

        let upper = n_bins.max(1) as i64;
        SuppressionWindow {
            left: (left.trunc() as i64).clamp(1, upper) as usize,
            right: (right.floor() as i64).clamp(1, upper) as usize,
            left_clamped,
            right_clamped,
        }
    }

    /// Replace the position of `peak` with `new_bin` and re-fit its shape on `main`.
    ///
    /// The peak keeps its slot index. Any calibrated energy is cleared since it
    /// no longer describes the new position.
    pub fn refit_peak<H: HistogramLike, F: CurveFitter>(
        &self,
        main: &H,
        fitter: &F,
        peak: &mut Peak,
        new_bin: usize,
    ) -> Result<(), DetectorError> {
        if new_bin == 0 || new_bin > main.len() {
            return Err(DetectorError::BinOutOfRange {
                bin: new_bin,
                len: main.len(),
            });
        }
        let (model, fit) = self.fit_at(main, new_bin, main.content(new_bin), fitter);
        peak.peak_bin = new_bin;
        peak.model = model;
        peak.fit = fit;
        peak.window = Some(self.suppression_window(new_bin, &model, &fit, main.len()));
        peak.energy = None;
        Ok(())
    }
}

/// A convenience function that uses the default detector configuration and
/// curve fitter to find `number_of_peaks` peaks in `spectrum`.
pub fn find_peaks<H: HistogramLike>(
    spectrum: &H,
    number_of_peaks: usize,
) -> Result<Vec<Peak>, DetectorError> {
    let detector = PeakDetector {
        number_of_peaks,
        ..PeakDetector::default()
    };
    let mut diagnostics = FitDiagnostics::default();
    detector
        .detect_peaks(spectrum, &LevenbergMarquardt::default(), &mut diagnostics)
        .map(|detection| detection.peaks)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::spectrum::Spectrum;
    use crate::test_data::{gaussian_on_background, three_bin_spike, two_peaks};
    use rstest::rstest;

    #[test_log::test]
    fn test_isolated_gaussian() {
        let spectrum = gaussian_on_background(200, 1000.0, 100.5, 3.0, 10.0);
        let peaks = find_peaks(&spectrum, 1).unwrap();
        assert_eq!(peaks.len(), 1);
        let peak = &peaks[0];
        let expected_bin = spectrum.find_bin(100.5) as i64;
        assert!((peak.peak_bin as i64 - expected_bin).abs() <= 1, "{peak}");
        assert!(peak.is_valid());
        assert!((peak.model.sigma - 3.0).abs() / 3.0 < 0.05, "{peak}");
        assert!(peak.area().unwrap() > 0.0);
        assert!((peak.resolution().unwrap() - 3.0 / 100.5).abs() < 1e-3);
    }

    #[test_log::test]
    fn test_spike_window() {
        let spectrum = three_bin_spike(100, 50, 5.0, 50.0);
        let detector = PeakDetector::new(1, 4, 10);
        let mut diagnostics = FitDiagnostics::default();
        let detection = detector
            .detect_peaks(&spectrum, &LevenbergMarquardt::default(), &mut diagnostics)
            .unwrap();

        let peak = &detection.peaks[0];
        assert_eq!(peak.peak_bin, 50);
        let window = peak.window.unwrap();
        assert_eq!((window.left, window.right), (46, 54));
        assert!(window.left_clamped);

        for bin in 1..=spectrum.len() {
            if window.contains(bin) {
                assert_eq!(detection.working_copy.content(bin), 0.0);
            } else {
                assert_eq!(detection.working_copy.content(bin), spectrum.content(bin));
            }
        }
        assert_eq!(diagnostics.bad_fits, 1);
        assert_eq!(diagnostics.good_fits, 0);
        assert_eq!(diagnostics.scanned_bins, 3);
    }

    #[test]
    fn test_stripping_leaves_everything_else_untouched() {
        let spectrum = two_peaks(300);
        let detector = PeakDetector::new(2, 4, 10);
        let mut diagnostics = FitDiagnostics::default();
        let detection = detector
            .detect_peaks(&spectrum, &LevenbergMarquardt::default(), &mut diagnostics)
            .unwrap();

        let bins: Vec<usize> = detection.peaks.iter().map(|p| p.peak_bin).collect();
        assert_eq!(bins, vec![81, 201]);

        let windows: Vec<SuppressionWindow> =
            detection.peaks.iter().map(|p| p.window.unwrap()).collect();
        for bin in 1..=spectrum.len() {
            let suppressed = windows.iter().any(|w| w.contains(bin));
            let observed = detection.working_copy.content(bin);
            if suppressed {
                assert_eq!(observed, 0.0, "bin {bin}");
            } else {
                assert_eq!(observed, spectrum.content(bin), "bin {bin}");
            }
        }
        assert_eq!(diagnostics.good_fits + diagnostics.bad_fits, 2);
    }

    #[test]
    fn test_exhausted_slots_are_not_found() {
        let spectrum = three_bin_spike(100, 50, 5.0, 50.0);
        let peaks = find_peaks(&spectrum, 3).unwrap();
        assert_eq!(peaks.len(), 3);
        assert!(peaks[0].is_found());
        assert!(!peaks[1].is_found());
        assert!(!peaks[2].is_found());
        assert_eq!(peaks[2].index, 2);
        assert_eq!(peaks[2].area(), None);

        let empty = Spectrum::from_counts(&[0.0; 40]);
        let peaks = find_peaks(&empty, 1).unwrap();
        assert_eq!(peaks[0].peak_bin, 0);
    }

    #[rstest]
    #[case(PeakDetector::new(0, 4, 10), DetectorError::NoPeaksRequested)]
    #[case(PeakDetector::new(1, 0, 10), DetectorError::InvalidDistances { min: 0, max: 10 })]
    #[case(PeakDetector::new(1, 11, 10), DetectorError::InvalidDistances { min: 11, max: 10 })]
    fn test_invalid_configuration(#[case] detector: PeakDetector, #[case] expected: DetectorError) {
        assert_eq!(detector.validate(), Err(expected.clone()));
        let spectrum = Spectrum::from_counts(&[1.0; 10]);
        let result = detector.detect_peaks(
            &spectrum,
            &LevenbergMarquardt::default(),
            &mut FitDiagnostics::default(),
        );
        assert_eq!(result.unwrap_err(), expected);
    }

    #[test]
    fn test_length_mismatch() {
        let main = Spectrum::from_counts(&[1.0; 10]);
        let mut working = Spectrum::from_counts(&[1.0; 9]);
        let result = PeakDetector::default().detect_peaks_in(
            &mut working,
            &main,
            &LevenbergMarquardt::default(),
            &mut FitDiagnostics::default(),
        );
        assert_eq!(
            result.unwrap_err(),
            DetectorError::LengthMismatch { working: 9, main: 10 }
        );
    }

    #[test]
    fn test_window_edges() {
        let detector = PeakDetector::new(1, 4, 10);
        let fit = ModelFitResult::new(0.0, 1, true, true);

        let wide = GaussianPeakShape::new(10.0, 100.0, 3.0, 0.0, 0.0);
        let window = detector.suppression_window(100, &wide, &fit, 200);
        assert_eq!((window.left, window.right), (94, 106));
        assert!(!window.left_clamped && !window.right_clamped);

        let too_wide = GaussianPeakShape::new(10.0, 100.0, 8.0, 0.0, 0.0);
        let window = detector.suppression_window(100, &too_wide, &fit, 200);
        assert_eq!((window.left, window.right), (96, 104));

        let window = detector.suppression_window(2, &wide, &fit, 200);
        assert_eq!(window.left, 1);

        let window = detector.suppression_window(199, &too_wide, &fit, 200);
        assert_eq!(window.right, 200);

        let window = detector.suppression_window(100, &wide, &ModelFitResult::failed(), 200);
        assert_eq!((window.left, window.right), (96, 104));
        assert!(window.left_clamped && window.right_clamped);
    }

    #[test]
    fn test_refit_peak() {
        let spectrum = two_peaks(300);
        let detector = PeakDetector::new(1, 4, 10);
        let fitter = LevenbergMarquardt::default();
        let mut diagnostics = FitDiagnostics::default();
        let mut peak = detector
            .detect_peaks(&spectrum, &fitter, &mut diagnostics)
            .unwrap()
            .peaks[0];
        peak.energy = Some(100.0);
        assert_eq!(peak.peak_bin, 81);

        detector.refit_peak(&spectrum, &fitter, &mut peak, 201).unwrap();
        assert_eq!(peak.peak_bin, 201);
        assert_eq!(peak.index, 0);
        assert_eq!(peak.energy, None);
        assert!((peak.model.mu - 200.5).abs() < 0.01, "{peak}");

        assert_eq!(
            detector.refit_peak(&spectrum, &fitter, &mut peak, 301),
            Err(DetectorError::BinOutOfRange { bin: 301, len: 300 })
        );
    }

    #[test]
    fn test_builder() {
        let detector = PeakDetector::builder()
            .number_of_peaks(5)
            .min_distance(3)
            .max_distance(12)
            .fit_half_width(8.0)
            .initial_sigma(0.5)
            .build();
        assert_eq!(detector.number_of_peaks, 5);
        assert_eq!(detector.min_distance, 3);
        assert_eq!(detector.max_distance, 12);
        assert_eq!(detector.fit_half_width, 8.0);
        assert_eq!(detector.initial_sigma, 0.5);
        assert!(detector.validate().is_ok());
    }

    #[test]
    fn test_diagnostics_merge() {
        let a = FitDiagnostics {
            good_fits: 1,
            bad_fits: 2,
            scanned_bins: 3,
        };
        let mut b = a + a;
        b += a;
        assert_eq!(b.good_fits, 3);
        assert_eq!(b.bad_fits, 6);
        assert_eq!(b.scanned_bins, 9);
    }
}
