use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::fitter::{ModelFitResult, PeakShapeModel};
use crate::peak_shape::GaussianPeakShape;

/// An inclusive range of 1-based bins which were zeroed in the working copy
/// after a peak was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SuppressionWindow {
    pub left: usize,
    pub right: usize,
    /// Whether the left edge had to be replaced because the fitted width put it
    /// too close to or too far from the peak bin
    pub left_clamped: bool,
    pub right_clamped: bool,
}

impl SuppressionWindow {
    pub fn contains(&self, bin: usize) -> bool {
        self.left <= bin && bin <= self.right
    }

    pub fn bins(&self) -> std::ops::RangeInclusive<usize> {
        self.left..=self.right
    }
}

/// A single detected spectral feature and its fitted shape.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Peak {
    /// The detection slot this peak was found in, in order of discovery
    pub index: usize,
    /// The 1-based bin of the local maximum, or `0` if no peak was found
    pub peak_bin: usize,
    pub model: GaussianPeakShape,
    pub fit: ModelFitResult,
    pub window: Option<SuppressionWindow>,
    /// The calibrated energy of the peak, once a calibration has been applied
    pub energy: Option<f64>,
}

impl Peak {
    pub fn new(index: usize, peak_bin: usize, model: GaussianPeakShape, fit: ModelFitResult) -> Self {
        Self {
            index,
            peak_bin,
            model,
            fit,
            window: None,
            energy: None,
        }
    }

    /// The placeholder emitted for a slot where nothing was left to find
    pub fn not_found(index: usize) -> Self {
        Self::new(index, 0, GaussianPeakShape::default(), ModelFitResult::failed())
    }

    pub fn is_found(&self) -> bool {
        self.peak_bin > 0
    }

    /// Whether the peak was found and its shape fit produced a usable model
    pub fn is_valid(&self) -> bool {
        self.is_found() && self.fit.success && self.model.is_valid()
    }

    pub fn area(&self) -> Option<f64> {
        if !self.is_valid() {
            return None;
        }
        self.model.area()
    }

    pub fn resolution(&self) -> Option<f64> {
        if !self.is_valid() {
            return None;
        }
        self.model.resolution()
    }

    pub fn full_width_at_half_max(&self) -> Option<f64> {
        if !self.is_valid() {
            return None;
        }
        Some(self.model.full_width_at_half_max())
    }

    pub fn to_report(&self, column: usize) -> PeakReport {
        PeakReport {
            column,
            peak_index: self.index,
            position_bin: self.peak_bin,
            area: self.area(),
            resolution: self.resolution(),
            energy: self.energy,
        }
    }
}

impl fmt::Display for Peak {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Peak({}, {}, {}, {})",
            self.index, self.peak_bin, self.model, self.fit.success
        )
    }
}

/// The per-peak record emitted for external serialization
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakReport {
    pub column: usize,
    pub peak_index: usize,
    pub position_bin: usize,
    pub area: Option<f64>,
    pub resolution: Option<f64>,
    pub energy: Option<f64>,
}
