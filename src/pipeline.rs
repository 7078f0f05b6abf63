//! Run detection, calibration and resampling over every column of a [`SpectrumMatrix`].
use log::{debug, info, warn};
use thiserror::Error;

#[cfg(feature = "parallelism")]
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::calibration::{Calibration, CalibrationError, CalibrationMode, Calibrator, CalibratorConfig};
use crate::fitter::{FitConfig, LevenbergMarquardt};
use crate::peak::{Peak, PeakReport};
use crate::peak_detector::{DetectorError, FitDiagnostics, PeakDetector};
use crate::resample::{apply_calibration, ResampleError, ResampledSpectrum};
use crate::sources::{KnownEnergies, SourceError};
use crate::spectrum::{HistogramLike, Spectrum, SpectrumMatrix};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcessingError {
    #[error("Peak detection failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("Calibration failed: {0}")]
    Calibration(#[from] CalibrationError),
    #[error("Resampling failed: {0}")]
    Resample(#[from] ResampleError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("Peak {index} does not exist, the column has {count} peaks")]
    NoSuchPeak { index: usize, count: usize },
}

/// Acceptance bounds a fitted peak must satisfy to be used for calibration.
///
/// Peaks which fail them are still reported.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakCriteria {
    /// The lowest acceptable fitted mean, in axis units
    pub x_min: f64,
    /// The highest acceptable fitted mean, in axis units
    pub x_max: f64,
    pub max_fwhm: f64,
    pub min_amplitude: f64,
    pub max_amplitude: f64,
}

impl Default for PeakCriteria {
    fn default() -> Self {
        Self {
            x_min: f64::NEG_INFINITY,
            x_max: f64::INFINITY,
            max_fwhm: f64::INFINITY,
            min_amplitude: 0.0,
            max_amplitude: f64::INFINITY,
        }
    }
}

impl PeakCriteria {
    pub fn accepts(&self, peak: &Peak) -> bool {
        let Some(fwhm) = peak.full_width_at_half_max() else {
            return false;
        };
        let model = &peak.model;
        self.x_min <= model.mu
            && model.mu <= self.x_max
            && fwhm <= self.max_fwhm
            && self.min_amplitude <= model.amplitude
            && model.amplitude <= self.max_amplitude
    }
}

/// Everything needed to process a column
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProcessorConfig {
    pub detector: PeakDetector,
    pub fit: FitConfig,
    pub calibrator: Calibrator,
    pub criteria: PeakCriteria,
    /// Columns whose mean falls below this are treated as empty and skipped
    pub min_mean: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            detector: PeakDetector::default(),
            fit: FitConfig::default(),
            calibrator: Calibrator::default(),
            criteria: PeakCriteria::default(),
            min_mean: 5.0,
        }
    }
}

impl ProcessorConfig {
    pub fn new(detector: PeakDetector, mode: CalibrationMode) -> Self {
        Self {
            detector,
            calibrator: Calibrator::new(mode, CalibratorConfig::default()),
            ..Default::default()
        }
    }

    pub fn fit(mut self, fit: FitConfig) -> Self {
        self.fit = fit;
        self
    }

    pub fn calibrator(mut self, calibrator: Calibrator) -> Self {
        self.calibrator = calibrator;
        self
    }

    pub fn criteria(mut self, criteria: PeakCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn min_mean(mut self, min_mean: f64) -> Self {
        self.min_mean = min_mean;
        self
    }
}

/// The fraction of a column's counts which fall inside its fitted peaks
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakToTotal {
    pub ratio: f64,
    /// The Poisson counting error on [`PeakToTotal::ratio`]
    pub error: f64,
}

impl PeakToTotal {
    /// Compute the ratio of `peak_area` to `total` along with its counting error,
    /// if both are positive.
    pub fn new(peak_area: f64, total: f64) -> Option<Self> {
        if !(peak_area > 0.0 && total > 0.0) {
            return None;
        }
        let ratio = peak_area / total;
        let error = ratio * (1.0 / peak_area + 1.0 / total).sqrt();
        Some(Self { ratio, error })
    }
}

/// The outcome of processing one column
#[derive(Debug, Clone)]
pub struct ColumnResult {
    /// The 1-based column number
    pub column: usize,
    /// The uncalibrated column spectrum
    pub spectrum: Spectrum,
    pub peaks: Vec<Peak>,
    /// Whether each peak passed the [`PeakCriteria`] and was offered to the calibrator
    pub accepted: Vec<bool>,
    pub calibration: Result<Calibration, CalibrationError>,
    /// The resampled spectrum, present only when calibration succeeded
    pub calibrated: Option<Result<ResampledSpectrum<Spectrum>, ResampleError>>,
    pub diagnostics: FitDiagnostics,
}

impl ColumnResult {
    pub fn is_calibrated(&self) -> bool {
        matches!(self.calibrated, Some(Ok(_)))
    }

    pub fn calibrated_spectrum(&self) -> Option<&Spectrum> {
        match &self.calibrated {
            Some(Ok(resampled)) => Some(&resampled.spectrum),
            _ => None,
        }
    }

    /// One report per peak slot
    pub fn reports(&self) -> Vec<PeakReport> {
        self.peaks.iter().map(|p| p.to_report(self.column)).collect()
    }

    /// The combined area of the usable peaks over the total counts in the column
    pub fn peak_to_total(&self) -> Option<PeakToTotal> {
        let area: f64 = self.peaks.iter().filter_map(|p| p.area()).sum();
        PeakToTotal::new(area, self.spectrum.total())
    }

    /// Move peak `peak_index` to `new_bin`, re-fit it and redo calibration and
    /// resampling for the column.
    pub fn change_peak(
        &mut self,
        processor: &ColumnProcessor,
        peak_index: usize,
        new_bin: usize,
        energies: &KnownEnergies,
    ) -> Result<(), ProcessingError> {
        let count = self.peaks.len();
        let peak = self
            .peaks
            .get_mut(peak_index)
            .ok_or(ProcessingError::NoSuchPeak {
                index: peak_index,
                count,
            })?;
        let previous = peak.peak_bin;
        processor
            .config
            .detector
            .refit_peak(&self.spectrum, &processor.fitter(), peak, new_bin)?;
        info!(
            "Column {}: moved peak {peak_index} from bin {previous} to {new_bin}",
            self.column
        );
        processor.calibrate_column(self, energies);
        Ok(())
    }
}

/// The results of processing an entire matrix
#[derive(Debug, Clone)]
pub struct ProcessingRun {
    pub columns: Vec<ColumnResult>,
    /// The columns skipped for falling below the minimum mean
    pub skipped: Vec<usize>,
    /// Detection diagnostics summed over every processed column
    pub diagnostics: FitDiagnostics,
    /// The matrix rebuilt from the calibrated columns. Columns which could not be
    /// calibrated are left empty.
    pub calibrated: SpectrumMatrix,
}

impl ProcessingRun {
    pub fn reports(&self) -> Vec<PeakReport> {
        self.columns.iter().flat_map(|c| c.reports()).collect()
    }

    pub fn calibrated_columns(&self) -> usize {
        self.columns.iter().filter(|c| c.is_calibrated()).count()
    }
}

/// Processes the columns of a spectrum matrix with a shared configuration
#[derive(Debug, Clone, Default)]
pub struct ColumnProcessor {
    pub config: ProcessorConfig,
}

impl ColumnProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    fn fitter(&self) -> LevenbergMarquardt {
        LevenbergMarquardt::new(self.config.fit.clone())
    }

    /// Detect, calibrate and resample a single column.
    ///
    /// Returns `Ok(None)` if the column's mean falls below [`ProcessorConfig::min_mean`].
    /// Calibration and resampling failures are recorded on the result rather than
    /// returned.
    pub fn process_column(
        &self,
        column: usize,
        spectrum: Spectrum,
        energies: &KnownEnergies,
    ) -> Result<Option<ColumnResult>, ProcessingError> {
        let mean = spectrum.mean();
        if !(mean >= self.config.min_mean) {
            debug!("Skipping column {column} with mean {mean:0.3}");
            return Ok(None);
        }

        let mut diagnostics = FitDiagnostics::default();
        let detection =
            self.config
                .detector
                .detect_peaks(&spectrum, &self.fitter(), &mut diagnostics)?;

        let mut result = ColumnResult {
            column,
            spectrum,
            peaks: detection.peaks,
            accepted: Vec::new(),
            calibration: Err(CalibrationError::NoCalibrationMatch),
            calibrated: None,
            diagnostics,
        };
        self.calibrate_column(&mut result, energies);

        match &result.calibration {
            Ok(calibration) => info!(
                "Column {column}: {} peaks, {} matched, {}",
                result.peaks.iter().filter(|p| p.is_found()).count(),
                calibration.match_count,
                calibration.mapping
            ),
            Err(err) => info!(
                "Column {column}: {} peaks, uncalibrated: {err}",
                result.peaks.iter().filter(|p| p.is_found()).count()
            ),
        }
        Ok(Some(result))
    }

    /// Re-derive the calibration, peak energies and resampled spectrum of `result`
    /// from its current peaks.
    pub fn calibrate_column(&self, result: &mut ColumnResult, energies: &KnownEnergies) {
        result.accepted = result
            .peaks
            .iter()
            .map(|p| self.config.criteria.accepts(p))
            .collect();
        // Calibrate on bin centers, the coordinates the resampler evaluates the mapping at
        let mut positions: Vec<f64> = result
            .peaks
            .iter()
            .zip(result.accepted.iter())
            .filter(|(_, accepted)| **accepted)
            .map(|(p, _)| result.spectrum.bin_center(p.peak_bin))
            .collect();
        positions.sort_by(f64::total_cmp);

        for peak in result.peaks.iter_mut() {
            peak.energy = None;
        }
        result.calibration = self
            .config
            .calibrator
            .calibrate(&positions, energies.as_slice());
        result.calibrated = match &result.calibration {
            Ok(calibration) => {
                calibration.annotate(&mut result.peaks, &result.spectrum);
                let resampled = apply_calibration(&result.spectrum, &calibration.mapping);
                if let Err(err) = &resampled {
                    warn!("Column {}: {err}", result.column);
                }
                Some(resampled)
            }
            Err(err) => {
                debug!("Column {}: calibration failed: {err}", result.column);
                None
            }
        };
    }

    /// Process every column of `matrix`, in parallel when the `parallelism`
    /// feature is enabled.
    pub fn process_matrix(
        &self,
        matrix: &SpectrumMatrix,
        energies: &KnownEnergies,
    ) -> Result<ProcessingRun, ProcessingError> {
        self.config.detector.validate()?;
        let outcomes = process_columns_inner(self, matrix, energies);

        let mut columns = Vec::with_capacity(outcomes.len());
        let mut skipped = Vec::new();
        let mut diagnostics = FitDiagnostics::default();
        let mut calibrated = matrix.zeroed_like();
        for (column, outcome) in (1..=matrix.columns).zip(outcomes) {
            match outcome? {
                Some(result) => {
                    diagnostics += result.diagnostics;
                    if let Some(spectrum) = result.calibrated_spectrum() {
                        calibrated.set_column(column, spectrum);
                    }
                    columns.push(result);
                }
                None => skipped.push(column),
            }
        }
        info!(
            "Processed {} columns, skipped {}, {} good and {} bad fits",
            columns.len(),
            skipped.len(),
            diagnostics.good_fits,
            diagnostics.bad_fits
        );
        Ok(ProcessingRun {
            columns,
            skipped,
            diagnostics,
            calibrated,
        })
    }
}

type ColumnOutcome = Result<Option<ColumnResult>, ProcessingError>;

// Can't inline cfg-if
cfg_if::cfg_if! {
    if #[cfg(feature = "parallelism")] {
        fn process_columns_inner(
            processor: &ColumnProcessor,
            matrix: &SpectrumMatrix,
            energies: &KnownEnergies,
        ) -> Vec<ColumnOutcome> {
            (1..=matrix.columns)
                .into_par_iter()
                .map(|c| processor.process_column(c, matrix.column(c), energies))
                .collect()
        }
    } else {
        fn process_columns_inner(
            processor: &ColumnProcessor,
            matrix: &SpectrumMatrix,
            energies: &KnownEnergies,
        ) -> Vec<ColumnOutcome> {
            (1..=matrix.columns)
                .map(|c| processor.process_column(c, matrix.column(c), energies))
                .collect()
        }
    }
}
