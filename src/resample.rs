//! Redistribute the counts of a spectrum along a calibrated axis.
//!
//! Every source bin is moved to the position its calibrated center maps to on the
//! same axis. The count is shared between the two target bins whose centers
//! bracket that position, in proportion to how close each one is.
use log::debug;
use thiserror::Error;

use crate::arrayops::first_non_increasing;
use crate::calibration::CalibrationMapping;
use crate::spectrum::HistogramLike;

/// Positions this close to a bin center are treated as landing on it exactly
const SNAP_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResampleError {
    #[error("The calibration is not strictly increasing or not finite at bin {bin}")]
    NonMonotonicMapping { bin: usize },
}

/// A spectrum produced by [`apply_calibration`] along with the counts that were
/// mapped off either end of the axis.
#[derive(Debug, Clone, PartialEq)]
pub struct ResampledSpectrum<H: HistogramLike> {
    pub spectrum: H,
    pub underflow: f64,
    pub overflow: f64,
}

impl<H: HistogramLike> ResampledSpectrum<H> {
    /// The in-range total plus the under- and overflow
    pub fn total(&self) -> f64 {
        self.spectrum.total() + self.underflow + self.overflow
    }
}

/// Linearly split `count` between the bins at `lower` and `lower + 1` for a
/// point `fraction` of the way from the first to the second.
#[inline]
fn split_count(count: f64, fraction: f64) -> (f64, f64) {
    (count * (1.0 - fraction), count * fraction)
}

/// Resample `spectrum` through `mapping`, keeping its binning.
///
/// The mapping must be finite and strictly increasing over the bin centers.
pub fn apply_calibration<H: HistogramLike>(
    spectrum: &H,
    mapping: &CalibrationMapping,
) -> Result<ResampledSpectrum<H>, ResampleError> {
    let n = spectrum.len();
    let positions: Vec<f64> = (1..=n)
        .map(|bin| spectrum.fractional_bin(mapping.evaluate(spectrum.bin_center(bin))))
        .collect();

    if let Some(i) = positions.iter().position(|u| !u.is_finite()) {
        return Err(ResampleError::NonMonotonicMapping { bin: i + 1 });
    }
    if let Some(i) = first_non_increasing(&positions) {
        return Err(ResampleError::NonMonotonicMapping { bin: i + 1 });
    }

    let mut out = spectrum.clone();
    for bin in 1..=n {
        out.set_content(bin, 0.0);
    }
    let mut underflow = 0.0;
    let mut overflow = 0.0;

    let deposit = |target: i64,
                   value: f64,
                   out: &mut H,
                   underflow: &mut f64,
                   overflow: &mut f64| {
        if value == 0.0 {
            return;
        }
        if target < 1 {
            *underflow += value;
        } else if target as usize > n {
            *overflow += value;
        } else {
            let target = target as usize;
            out.set_content(target, out.content(target) + value);
        }
    };

    for (bin, u) in (1..=n).zip(positions.iter().copied()) {
        let count = spectrum.content(bin);
        if count == 0.0 {
            continue;
        }
        // Both neighbours lie off the axis, settle these before any integer conversion
        if u < 0.0 {
            underflow += count;
            continue;
        }
        if u >= (n + 1) as f64 {
            overflow += count;
            continue;
        }
        let nearest = u.round();
        let u = if (u - nearest).abs() < SNAP_TOLERANCE {
            nearest
        } else {
            u
        };
        let lower = u.floor();
        let (low_share, high_share) = split_count(count, u - lower);
        let lower = lower as i64;
        deposit(lower, low_share, &mut out, &mut underflow, &mut overflow);
        deposit(lower + 1, high_share, &mut out, &mut underflow, &mut overflow);
    }

    debug!("Resampled {n} bins, {underflow:0.3} counts underflowed and {overflow:0.3} overflowed");
    Ok(ResampledSpectrum {
        spectrum: out,
        underflow,
        overflow,
    })
}
