//! Coordinate normalization and restoration.
//!
//! [`normalize`] maps a cloud into a centered frame whose largest bounding-box
//! side is 1 (every coordinate lands in `[-0.5, 0.5]`), and [`restore`] is its
//! exact algebraic inverse. The [`NormalizationParams`] produced by the first
//! call must be handed to the second, typically across a model call that works
//! in the normalized frame.

use log::warn;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::loaders::PointCloud;

/// Errors raised by the coordinate transforms.
#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    #[error("point cloud is empty")]
    EmptyInput,

    #[error("point cloud has zero extent (all points coincide)")]
    DegenerateGeometry,

    #[error("point {index} has a non-finite coordinate")]
    NonFiniteCoordinate { index: usize },

    #[error("invalid normalization scale: {0}")]
    InvalidScale(f64),
}

/// Result type for transform operations.
pub type Result<T> = std::result::Result<T, TransformError>;

/// Center and isotropic scale of a normalized cloud.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    /// Bounding-box center of the original cloud.
    pub center: [f64; 3],
    /// `1 / max_extent` of the original bounding box.
    pub scale: f64,
}

impl NormalizationParams {
    /// Returns true when the scale can be inverted.
    pub fn is_valid(&self) -> bool {
        self.scale.is_finite() && self.scale > 0.0 && self.center.iter().all(|c| c.is_finite())
    }
}

/// Axis-aligned bounds of a cloud as `(min, max)`.
///
/// Returns `None` for an empty cloud.
pub fn bounding_box(cloud: &PointCloud) -> Option<([f32; 3], [f32; 3])> {
    if cloud.is_empty() {
        return None;
    }

    let axis_bounds = |values: &[f32]| {
        values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    };

    let (x_min, x_max) = axis_bounds(&cloud.x);
    let (y_min, y_max) = axis_bounds(&cloud.y);
    let (z_min, z_max) = axis_bounds(&cloud.z);

    Some(([x_min, y_min, z_min], [x_max, y_max, z_max]))
}

/// Normalize a cloud into the unit-extent frame.
///
/// Computes the bounding-box center and `scale = 1 / max_extent`, then maps
/// every point to `(p - center) * scale`. Colors are carried over unchanged.
///
/// # Errors
///
/// - [`TransformError::EmptyInput`] for an empty cloud
/// - [`TransformError::NonFiniteCoordinate`] if any coordinate is NaN or infinite
/// - [`TransformError::DegenerateGeometry`] when every point coincides
pub fn normalize(cloud: &PointCloud) -> Result<(PointCloud, NormalizationParams)> {
    if let Some(index) = cloud.first_non_finite() {
        return Err(TransformError::NonFiniteCoordinate { index });
    }
    let (min, max) = bounding_box(cloud).ok_or(TransformError::EmptyInput)?;

    let mut center = [0f64; 3];
    let mut max_extent = 0f64;
    for axis in 0..3 {
        let (lo, hi) = (min[axis] as f64, max[axis] as f64);
        center[axis] = (lo + hi) / 2.0;
        max_extent = max_extent.max(hi - lo);
    }

    if max_extent <= 0.0 {
        warn!(
            "cannot normalize {} points: all coincide at {:?}",
            cloud.len(),
            min
        );
        return Err(TransformError::DegenerateGeometry);
    }

    let params = NormalizationParams {
        center,
        scale: 1.0 / max_extent,
    };

    let map_axis = |values: &[f32], axis: usize| -> Vec<f32> {
        values
            .par_iter()
            .map(|&v| ((v as f64 - center[axis]) * params.scale) as f32)
            .collect()
    };

    let normalized = PointCloud {
        x: map_axis(&cloud.x, 0),
        y: map_axis(&cloud.y, 1),
        z: map_axis(&cloud.z, 2),
        colors: cloud.colors.clone(),
    };

    Ok((normalized, params))
}

/// Map a normalized cloud back to the original frame.
///
/// Applies `p / scale + center` to every point in input order; colors pass
/// through untouched.
///
/// # Errors
///
/// [`TransformError::InvalidScale`] if `params.scale` is not a positive finite
/// number.
pub fn restore(cloud: &PointCloud, params: &NormalizationParams) -> Result<PointCloud> {
    if !params.is_valid() {
        return Err(TransformError::InvalidScale(params.scale));
    }

    let map_axis = |values: &[f32], axis: usize| -> Vec<f32> {
        values
            .par_iter()
            .map(|&v| (v as f64 / params.scale + params.center[axis]) as f32)
            .collect()
    };

    Ok(PointCloud {
        x: map_axis(&cloud.x, 0),
        y: map_axis(&cloud.y, 1),
        z: map_axis(&cloud.z, 2),
        colors: cloud.colors.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skewed_cloud() -> PointCloud {
        PointCloud::from_coords(&[
            [10.0, -4.0, 100.0],
            [14.0, -3.0, 101.0],
            [12.0, -2.0, 100.5],
            [11.5, -3.5, 100.25],
        ])
    }

    #[test]
    fn test_normalize_fits_unit_box() {
        let (normalized, params) = normalize(&skewed_cloud()).unwrap();

        assert_eq!(params.center, [12.0, -3.0, 100.5]);
        assert!((params.scale - 0.25).abs() < 1e-12);

        let (min, max) = bounding_box(&normalized).unwrap();
        // The longest axis (x) spans exactly [-0.5, 0.5].
        assert!((min[0] + 0.5).abs() < 1e-6);
        assert!((max[0] - 0.5).abs() < 1e-6);
        for axis in 0..3 {
            assert!(min[axis] >= -0.5 - 1e-6 && max[axis] <= 0.5 + 1e-6);
        }
    }

    #[test]
    fn test_round_trip_restores_original() {
        let mut cloud = skewed_cloud();
        cloud.colors = Some(vec![[1, 2, 3], [4, 5, 6], [7, 8, 9], [10, 11, 12]]);

        let (normalized, params) = normalize(&cloud).unwrap();
        let restored = restore(&normalized, &params).unwrap();

        for i in 0..cloud.len() {
            let (a, b) = (cloud.point(i), restored.point(i));
            for axis in 0..3 {
                assert!((a[axis] - b[axis]).abs() < 1e-4, "{:?} vs {:?}", a, b);
            }
        }
        assert_eq!(restored.colors, cloud.colors);
    }

    #[test]
    fn test_planar_cloud_normalizes() {
        let cloud = PointCloud::from_coords(&[[0.0, 0.0, 5.0], [2.0, 1.0, 5.0], [1.0, 3.0, 5.0]]);
        let (normalized, params) = normalize(&cloud).unwrap();

        assert!((params.scale - 1.0 / 3.0).abs() < 1e-12);
        assert!(normalized.z.iter().all(|&z| z == 0.0));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(
            normalize(&PointCloud::new()).unwrap_err(),
            TransformError::EmptyInput
        );
    }

    #[test]
    fn test_coincident_points_are_degenerate() {
        let cloud = PointCloud::from_coords(&[[1.5, 2.5, 3.5]; 16]);
        assert_eq!(
            normalize(&cloud).unwrap_err(),
            TransformError::DegenerateGeometry
        );
    }

    #[test]
    fn test_non_finite_rejected() {
        let cloud = PointCloud::from_coords(&[[0.0, 0.0, 0.0], [f32::INFINITY, 0.0, 0.0]]);
        assert_eq!(
            normalize(&cloud).unwrap_err(),
            TransformError::NonFiniteCoordinate { index: 1 }
        );
    }

    #[test]
    fn test_restore_rejects_zero_scale() {
        let params = NormalizationParams {
            center: [0.0; 3],
            scale: 0.0,
        };
        assert_eq!(
            restore(&skewed_cloud(), &params).unwrap_err(),
            TransformError::InvalidScale(0.0)
        );
    }
}
