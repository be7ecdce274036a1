//! Statistical outlier removal.
//!
//! A point is an outlier when the mean distance to its `k` nearest neighbours
//! exceeds `μ + std_ratio · σ`, where `μ` and `σ` are the mean and sample
//! standard deviation of that per-point statistic over the whole cloud.
//! Neighbour queries use a `kiddo` KD-tree and run in parallel with `rayon`.

use std::num::NonZeroUsize;

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use rayon::prelude::*;

use crate::core::loaders::PointCloud;

/// Default neighbourhood size.
pub const DEFAULT_NEIGHBORS: usize = 20;

/// Default standard deviation multiplier.
pub const DEFAULT_STD_RATIO: f32 = 2.0;

/// Mean Euclidean distance from each point to its `k` nearest neighbours,
/// excluding the point itself.
///
/// `k` is clamped to `coords.len() - 1`. Coordinates must be finite.
pub fn mean_neighbor_distances(coords: &[[f32; 3]], k: usize) -> Vec<f64> {
    let n = coords.len();
    let k = k.min(n.saturating_sub(1));
    let query_size = match NonZeroUsize::new(k + 1) {
        Some(q) if k > 0 => q,
        _ => return vec![0.0; n],
    };

    let tree: ImmutableKdTree<f32, 3> = ImmutableKdTree::new_from_slice(coords);

    coords
        .par_iter()
        .enumerate()
        .map(|(i, coord)| {
            let total: f64 = tree
                .nearest_n::<SquaredEuclidean>(coord, query_size)
                .iter()
                .filter(|nn| nn.item as usize != i)
                .take(k)
                .map(|nn| (nn.distance as f64).sqrt())
                .sum();
            total / k as f64
        })
        .collect()
}

/// Running mean and sample standard deviation (Welford).
///
/// A constant sequence yields exactly that constant as the mean and a zero
/// deviation.
fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for (count, &v) in values.iter().enumerate() {
        let delta = v - mean;
        mean += delta / (count + 1) as f64;
        m2 += delta * (v - mean);
    }
    let std = if values.len() > 1 {
        (m2 / (values.len() - 1) as f64).sqrt()
    } else {
        0.0
    };
    (mean, std)
}

/// Indices of the points that pass the statistical outlier test.
///
/// Returned indices are an increasing subsequence of `0..len`. Points with a
/// NaN or infinite coordinate are always dropped. Among the rest, clouds with
/// no more than `k` points, and `k == 0`, keep every point.
pub fn inlier_indices(cloud: &PointCloud, k: usize, std_ratio: f32) -> Vec<usize> {
    let finite: Vec<usize> = (0..cloud.len())
        .filter(|&i| cloud.point(i).iter().all(|c| c.is_finite()))
        .collect();
    if k == 0 || finite.len() <= k {
        return finite;
    }

    let coords: Vec<[f32; 3]> = finite.iter().map(|&i| cloud.point(i)).collect();
    let distances = mean_neighbor_distances(&coords, k);
    let (mean, std) = mean_and_std(&distances);
    let threshold = mean + std_ratio as f64 * std;

    finite
        .iter()
        .zip(&distances)
        .filter(|(_, &d)| d <= threshold)
        .map(|(&i, _)| i)
        .collect()
}

/// Remove statistical outliers from a cloud.
///
/// # Arguments
///
/// * `cloud` - Input point cloud (colors follow their points)
/// * `k` - Number of nearest neighbours per point
/// * `std_ratio` - Standard deviation multiplier for the cut-off
///
/// # Returns
///
/// Tuple of (filtered_cloud, retained_indices), the indices in input order.
pub fn remove_statistical_outliers(
    cloud: &PointCloud,
    k: usize,
    std_ratio: f32,
) -> (PointCloud, Vec<usize>) {
    let kept = inlier_indices(cloud, k, std_ratio);
    log::debug!(
        "outlier filter (k={}, std_ratio={}) kept {}/{} points",
        k,
        std_ratio,
        kept.len(),
        cloud.len()
    );
    (cloud.select(&kept), kept)
}
