use num_traits::Float;

/// Build the grid `start, start + step, ...` with `steps + 1` points, computing
/// each point from its integer offset so the last point does not drift.
pub fn stepped<T: Float>(start: T, step: T, steps: usize) -> impl Iterator<Item = T> {
    (0..=steps).map(move |i| start + T::from(i).unwrap_or_else(T::nan) * step)
}

/// Check if the values in `it` are monotonically ascending or flat
pub fn is_increasing<F: Float + PartialOrd>(it: &[F]) -> bool {
    it.windows(2).all(|w| w[0] <= w[1])
}

/// Check if the values in `it` are strictly ascending, returning the index of
/// the first value which breaks the ordering otherwise.
pub fn first_non_increasing<F: Float + PartialOrd>(it: &[F]) -> Option<usize> {
    it.windows(2)
        .position(|w| !(w[0] < w[1]))
        .map(|i| i + 1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_stepped_endpoints() {
        let grid: Vec<f64> = stepped(0.1, 0.01, 990).collect();
        assert_eq!(grid.len(), 991);
        assert!((grid[0] - 0.1).abs() < 1e-12);
        assert!((grid[990] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_ordering() {
        assert!(is_increasing(&[1.0, 1.0, 2.0]));
        assert_eq!(first_non_increasing(&[1.0, 2.0, 3.0]), None);
        assert_eq!(first_non_increasing(&[1.0, 2.0, 2.0, 3.0]), Some(2));
        assert_eq!(first_non_increasing(&[1.0, f64::NAN]), Some(1));
    }
}
