//! Small dense linear algebra helpers shared by the curve fitter and the
//! polynomial calibration.
//!
//! The solver backend is chosen at compile time, `ndarray-linalg` when one of the
//! LAPACK features is enabled, otherwise `nalgebra`.
use cfg_if::cfg_if;

/// Solve the square system `a x = b` where `a` is an `n x n` row-major matrix.
///
/// Returns `None` when the system is singular or the inputs are malformed.
pub fn solve(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    if a.len() != n * n || b.len() != n || n == 0 {
        return None;
    }
    cfg_if! {
        if #[cfg(feature = "ndarray-linalg")] {
            return solve_ndarray(a, b, n).filter(|x| x.iter().all(|v| v.is_finite()));
        } else if #[cfg(feature = "nalgebra")] {
            return solve_nalgebra(a, b, n).filter(|x| x.iter().all(|v| v.is_finite()));
        } else {
            compile_error!("gammacal requires either the `nalgebra` feature or a LAPACK backend feature");
        }
    }
}

#[cfg(feature = "ndarray-linalg")]
fn solve_ndarray(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    use ndarray::{Array1, Array2};
    use ndarray_linalg::Solve;

    let a = Array2::from_shape_vec((n, n), a.to_vec()).ok()?;
    let b = Array1::from_vec(b.to_vec());
    a.solve_into(b).ok().map(|x| x.to_vec())
}

#[cfg(feature = "nalgebra")]
#[allow(dead_code)]
fn solve_nalgebra(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    use nalgebra::{DMatrix, DVector};

    let a = DMatrix::from_row_slice(n, n, a);
    let b = DVector::from_column_slice(b);
    a.lu().solve(&b).map(|x| x.iter().copied().collect())
}

/// The ordinary least squares solution of `x c = y`, computed by solving the
/// normal equations `(xᵗx) c = xᵗy`.
///
/// `design` holds one row of `terms` regressors per observation.
#[allow(non_snake_case)]
pub fn least_squares(design: &[Vec<f64>], y: &[f64], terms: usize) -> Option<Vec<f64>> {
    if design.len() != y.len() || design.iter().any(|row| row.len() != terms) {
        return None;
    }
    let mut XtX = vec![0.0; terms * terms];
    let mut Xty = vec![0.0; terms];
    for (row, yi) in design.iter().zip(y.iter()) {
        for j in 0..terms {
            Xty[j] += row[j] * yi;
            for k in 0..terms {
                XtX[j * terms + k] += row[j] * row[k];
            }
        }
    }
    solve(&XtX, &Xty, terms)
}
