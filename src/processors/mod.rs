//! Point selection and filtering.

pub mod outliers;
pub mod sampling;

pub use outliers::{inlier_indices, remove_statistical_outliers};
pub use sampling::{resize_to, sample_points, SamplingError, SamplingMethod};
