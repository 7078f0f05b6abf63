//! One- and two-dimensional binned spectra.
//!
//! Bins are addressed with 1-based indices, `1..=len()`. Reads outside of that
//! range yield zero, writes outside of it are ignored, so neighbourhood lookups
//! near the edges of the axis never need special casing.
use std::fmt;

use num_traits::ToPrimitive;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The operations the peak detector and resampler need from a histogram.
pub trait HistogramLike: Clone {
    /// The number of bins on the axis
    fn len(&self) -> usize;

    /// The count stored in `bin`, or zero when `bin` is outside `1..=len()`
    fn content(&self, bin: usize) -> f64;

    /// Overwrite the count stored in `bin`
    fn set_content(&mut self, bin: usize, value: f64);

    /// The axis coordinate at the center of `bin`
    fn bin_center(&self, bin: usize) -> f64;

    /// The bin containing the axis coordinate `x`, which may be `0` (underflow)
    /// or `len() + 1` (overflow)
    fn find_bin(&self, x: f64) -> usize;

    /// The continuous position of `x` on the axis, scaled so that the center of
    /// bin `i` sits at exactly `i`
    fn fractional_bin(&self, x: f64) -> f64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signed offset lookup, zero when `bin + offset` leaves the axis.
    fn content_at_offset(&self, bin: usize, offset: i64) -> f64 {
        let target = bin as i64 + offset;
        if target < 1 {
            0.0
        } else {
            self.content(target as usize)
        }
    }

    /// Sum of all bin contents
    fn total(&self) -> f64 {
        (1..=self.len()).map(|i| self.content(i)).sum()
    }

    /// Count-weighted mean of the bin centers
    fn mean(&self) -> f64 {
        let (acc, weight) = (1..=self.len()).fold((0.0, 0.0), |(acc, weight), i| {
            let y = self.content(i);
            (acc + y * self.bin_center(i), weight + y)
        });
        if weight == 0.0 {
            0.0
        } else {
            acc / weight
        }
    }
}

/// A uniformly binned one dimensional spectrum
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Spectrum {
    /// The low edge of the first bin
    pub x_min: f64,
    /// The high edge of the last bin
    pub x_max: f64,
    counts: Vec<f64>,
}

impl Spectrum {
    pub fn new(x_min: f64, x_max: f64, counts: Vec<f64>) -> Self {
        assert!(
            x_max > x_min,
            "axis upper edge ({x_max}) must exceed lower edge ({x_min})"
        );
        Self {
            x_min,
            x_max,
            counts,
        }
    }

    /// Create a spectrum whose axis runs from `0` to `counts.len()` so that every bin is one unit wide.
    pub fn from_counts<T: ToPrimitive>(counts: &[T]) -> Self {
        let counts: Vec<f64> = counts
            .iter()
            .map(|c| c.to_f64().unwrap_or_default())
            .collect();
        let n = counts.len().max(1) as f64;
        Self::new(0.0, n, counts)
    }

    /// An empty spectrum sharing the binning of `self`
    pub fn zeroed_like(&self) -> Self {
        Self::new(self.x_min, self.x_max, vec![0.0; self.counts.len()])
    }

    pub fn bin_width(&self) -> f64 {
        (self.x_max - self.x_min) / self.counts.len().max(1) as f64
    }

    /// The counts as a 0-based slice
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    pub fn counts_mut(&mut self) -> &mut [f64] {
        &mut self.counts
    }

    /// The bin centers as a 0-based vector
    pub fn centers(&self) -> Vec<f64> {
        (1..=self.counts.len()).map(|i| self.bin_center(i)).collect()
    }

    /// Iterate over `(bin, center, count)` triples
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64, f64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .map(|(i, y)| (i + 1, self.bin_center(i + 1), *y))
    }
}

impl HistogramLike for Spectrum {
    #[inline]
    fn len(&self) -> usize {
        self.counts.len()
    }

    #[inline]
    fn content(&self, bin: usize) -> f64 {
        if bin == 0 {
            return 0.0;
        }
        self.counts.get(bin - 1).copied().unwrap_or_default()
    }

    #[inline]
    fn set_content(&mut self, bin: usize, value: f64) {
        if bin == 0 {
            return;
        }
        if let Some(slot) = self.counts.get_mut(bin - 1) {
            *slot = value;
        }
    }

    #[inline]
    fn bin_center(&self, bin: usize) -> f64 {
        self.x_min + (bin as f64 - 0.5) * self.bin_width()
    }

    fn find_bin(&self, x: f64) -> usize {
        if x < self.x_min {
            return 0;
        }
        if x >= self.x_max {
            return self.counts.len() + 1;
        }
        let bin = ((x - self.x_min) / self.bin_width()).floor() as usize + 1;
        bin.min(self.counts.len())
    }

    #[inline]
    fn fractional_bin(&self, x: f64) -> f64 {
        (x - self.x_min) / self.bin_width() + 0.5
    }
}

impl fmt::Display for Spectrum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Spectrum({} bins, [{}, {}), total {})",
            self.counts.len(),
            self.x_min,
            self.x_max,
            self.total()
        )
    }
}

/// A two dimensional histogram whose columns are detector channels and whose
/// rows are energy bins.
///
/// Columns are 1-based like bins.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpectrumMatrix {
    pub columns: usize,
    pub rows: usize,
    /// The low edge of the first row bin
    pub y_min: f64,
    /// The high edge of the last row bin
    pub y_max: f64,
    /// Row-major storage, `data[(row - 1) * columns + (column - 1)]`
    data: Vec<f64>,
}

impl SpectrumMatrix {
    /// Create an empty matrix whose row axis spans `[y_min, y_max)`.
    ///
    /// Returns `None` unless `y_max > y_min`.
    pub fn new(columns: usize, rows: usize, y_min: f64, y_max: f64) -> Option<Self> {
        if !(y_max > y_min) {
            return None;
        }
        Some(Self {
            columns,
            rows,
            y_min,
            y_max,
            data: vec![0.0; columns * rows],
        })
    }

    /// Build a matrix from row-major data, with a unit-width row axis starting at zero.
    ///
    /// Returns `None` if the rows do not all have the same length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Option<Self> {
        let n_rows = rows.len();
        let n_columns = rows.first().map(|r| r.len()).unwrap_or_default();
        if rows.iter().any(|r| r.len() != n_columns) {
            return None;
        }
        let data = rows.into_iter().flatten().collect();
        Some(Self {
            columns: n_columns,
            rows: n_rows,
            y_min: 0.0,
            y_max: n_rows.max(1) as f64,
            data,
        })
    }

    #[inline]
    fn offset(&self, column: usize, row: usize) -> Option<usize> {
        if column == 0 || row == 0 || column > self.columns || row > self.rows {
            None
        } else {
            Some((row - 1) * self.columns + (column - 1))
        }
    }

    pub fn get(&self, column: usize, row: usize) -> f64 {
        self.offset(column, row)
            .map(|i| self.data[i])
            .unwrap_or_default()
    }

    pub fn set(&mut self, column: usize, row: usize, value: f64) {
        if let Some(i) = self.offset(column, row) {
            self.data[i] = value;
        }
    }

    /// Project a single column onto the row axis
    pub fn column(&self, column: usize) -> Spectrum {
        let counts = (1..=self.rows).map(|row| self.get(column, row)).collect();
        Spectrum::new(self.y_min, self.y_max, counts)
    }

    /// Overwrite a column with the contents of `spectrum`, truncating to the
    /// shorter of the two lengths.
    pub fn set_column(&mut self, column: usize, spectrum: &Spectrum) {
        for (row, value) in (1..=self.rows).zip(spectrum.counts().iter().copied()) {
            self.set(column, row, value);
        }
    }

    /// An empty matrix sharing the binning of `self`
    pub fn zeroed_like(&self) -> Self {
        Self {
            data: vec![0.0; self.data.len()],
            ..*self
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bin_addressing() {
        let mut spectrum = Spectrum::from_counts(&[1u32, 2, 3, 4]);
        assert_eq!(spectrum.len(), 4);
        assert_eq!(spectrum.content(0), 0.0);
        assert_eq!(spectrum.content(1), 1.0);
        assert_eq!(spectrum.content(4), 4.0);
        assert_eq!(spectrum.content(5), 0.0);
        assert_eq!(spectrum.content_at_offset(2, -4), 0.0);
        assert_eq!(spectrum.content_at_offset(2, 2), 4.0);
        assert_eq!(spectrum.bin_center(1), 0.5);
        assert_eq!(spectrum.find_bin(0.5), 1);
        assert_eq!(spectrum.find_bin(3.99), 4);
        assert_eq!(spectrum.find_bin(-1.0), 0);
        assert_eq!(spectrum.find_bin(4.0), 5);
        assert_eq!(spectrum.fractional_bin(spectrum.bin_center(3)), 3.0);
        assert_eq!(spectrum.fractional_bin(1.0), 1.5);

        spectrum.set_content(0, 10.0);
        spectrum.set_content(9, 10.0);
        spectrum.set_content(2, 7.0);
        assert_eq!(spectrum.counts(), &[1.0, 7.0, 3.0, 4.0]);
        assert_eq!(spectrum.total(), 15.0);
    }

    #[test]
    fn test_mean() {
        let spectrum = Spectrum::new(10.0, 14.0, vec![0.0, 1.0, 1.0, 0.0]);
        assert_eq!(spectrum.bin_width(), 1.0);
        assert!((spectrum.mean() - 12.0).abs() < 1e-12);
        assert_eq!(spectrum.zeroed_like().mean(), 0.0);
    }

    #[test]
    fn test_matrix_projection() {
        let matrix = SpectrumMatrix::from_rows(vec![
            vec![1.0, 10.0],
            vec![2.0, 20.0],
            vec![3.0, 30.0],
        ])
        .unwrap();
        assert_eq!(matrix.columns, 2);
        assert_eq!(matrix.rows, 3);
        let second = matrix.column(2);
        assert_eq!(second.counts(), &[10.0, 20.0, 30.0]);

        let mut copy = matrix.zeroed_like();
        copy.set_column(2, &second);
        assert_eq!(copy.get(2, 3), 30.0);
        assert_eq!(copy.get(1, 3), 0.0);
        assert_eq!(copy.get(3, 1), 0.0);

        assert!(SpectrumMatrix::from_rows(vec![vec![1.0], vec![1.0, 2.0]]).is_none());
    }

    #[test]
    fn test_matrix_axis_range() {
        let matrix = SpectrumMatrix::new(2, 4, 10.0, 30.0).unwrap();
        assert_eq!(matrix.column(1).bin_center(1), 12.5);
        assert_eq!(matrix.zeroed_like(), matrix);
        assert!(SpectrumMatrix::new(2, 4, 5.0, 5.0).is_none());
        assert!(SpectrumMatrix::new(2, 4, 5.0, 1.0).is_none());
        assert!(SpectrumMatrix::new(2, 4, f64::NAN, 1.0).is_none());
    }
}
