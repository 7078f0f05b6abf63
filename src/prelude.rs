pub use crate::fitter::{CurveFitter, PeakShapeModel};
pub use crate::spectrum::HistogramLike;
