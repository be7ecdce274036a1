//! Point sampling strategies.
//!
//! Reduces a cloud to a target cardinality with one of three strategies:
//! - uniform random selection without replacement
//! - farthest point sampling (FPS), greedy maximin coverage
//! - voxel grid down-sampling followed by FPS
//!
//! Clouds already at or below the target are returned unchanged; sampling
//! never pads or duplicates. [`resize_to`] is the exception: it is the model
//! input adapter and does repeat points to reach a fixed size.
//!
//! # Example
//!
//! ```
//! use completion_pipeline::core::loaders::PointCloud;
//! use completion_pipeline::processors::sampling::{sample_points, SamplingMethod};
//! use rand::SeedableRng;
//!
//! let coords: Vec<[f32; 3]> = (0..100).map(|i| [i as f32, 0.0, 0.0]).collect();
//! let cloud = PointCloud::from_coords(&coords);
//! let mut rng = rand::rngs::StdRng::seed_from_u64(7);
//! let sampled = sample_points(&cloud, 10, &SamplingMethod::FarthestPoint, &mut rng);
//! assert_eq!(sampled.len(), 10);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rand::seq::index;
use rand::Rng;
use rayon::prelude::*;
use thiserror::Error;

use crate::core::loaders::PointCloud;

/// Default voxel edge length, in normalized units.
pub const DEFAULT_VOXEL_SIZE: f32 = 0.02;

/// Errors that can occur while choosing a sampling strategy.
#[derive(Debug, Error, PartialEq)]
pub enum SamplingError {
    #[error("unsupported sampling method '{0}' (expected random, fps or voxel)")]
    UnsupportedMethod(String),

    #[error("voxel size must be positive and finite, got {0}")]
    InvalidVoxelSize(f32),
}

/// Sampling strategy and its parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingMethod {
    /// Uniform random subset, in draw order.
    Random,
    /// Farthest point sampling.
    FarthestPoint,
    /// Voxel centroids, then farthest point sampling.
    VoxelThenFarthestPoint { voxel_size: f32 },
}

impl SamplingMethod {
    /// Resolve a method by name, using `voxel_size` for the voxel variant.
    ///
    /// Accepted names (case-insensitive): `random`, `fps` / `farthest_point`,
    /// `voxel` / `voxel_fps`.
    pub fn from_name(name: &str, voxel_size: f32) -> Result<Self, SamplingError> {
        match name.trim().to_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "fps" | "farthest_point" => Ok(Self::FarthestPoint),
            "voxel" | "voxel_fps" => {
                if !(voxel_size.is_finite() && voxel_size > 0.0) {
                    return Err(SamplingError::InvalidVoxelSize(voxel_size));
                }
                Ok(Self::VoxelThenFarthestPoint { voxel_size })
            }
            other => Err(SamplingError::UnsupportedMethod(other.to_string())),
        }
    }

    /// Short name used in configs and requests.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::FarthestPoint => "fps",
            Self::VoxelThenFarthestPoint { .. } => "voxel",
        }
    }
}

impl Default for SamplingMethod {
    fn default() -> Self {
        Self::FarthestPoint
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SamplingMethod {
    type Err = SamplingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s, DEFAULT_VOXEL_SIZE)
    }
}

/// Draw `target` distinct indices uniformly without replacement.
///
/// Indices come back in draw order. When `n <= target` all indices `0..n`
/// are returned in order.
pub fn random_indices<R: Rng + ?Sized>(n: usize, target: usize, rng: &mut R) -> Vec<usize> {
    if n <= target {
        return (0..n).collect();
    }
    index::sample(rng, n, target).into_vec()
}

/// Farthest point sampling over `coords`.
///
/// The first index is drawn uniformly at random; every following pick is the
/// point whose squared distance to the nearest already-selected point is
/// largest, ties going to the lowest index. Runs in O(target * n), with the
/// distance update and arg-max done in parallel.
///
/// When `coords.len() <= target` all indices are returned in order.
pub fn farthest_point_indices<R: Rng + ?Sized>(
    coords: &[[f32; 3]],
    target: usize,
    rng: &mut R,
) -> Vec<usize> {
    let n = coords.len();
    if n <= target {
        return (0..n).collect();
    }
    if target == 0 {
        return Vec::new();
    }

    let mut selected = Vec::with_capacity(target);
    let mut nearest = vec![f32::INFINITY; n];
    let mut current = rng.gen_range(0..n);

    for _ in 0..target {
        selected.push(current);
        // Selected points can never win the arg-max again.
        nearest[current] = f32::NEG_INFINITY;
        let c = coords[current];

        // Fused update + arg-max. The reduction is a total order on
        // (distance desc, index asc), so the result is deterministic.
        let (_, next) = nearest
            .par_iter_mut()
            .zip(coords.par_iter())
            .enumerate()
            .map(|(i, (best, p))| {
                let dx = p[0] - c[0];
                let dy = p[1] - c[1];
                let dz = p[2] - c[2];
                let d = dx * dx + dy * dy + dz * dz;
                if d < *best {
                    *best = d;
                }
                (*best, i)
            })
            .reduce(
                || (f32::NEG_INFINITY, usize::MAX),
                |a, b| {
                    if b.0 > a.0 || (b.0 == a.0 && b.1 < a.1) {
                        b
                    } else {
                        a
                    }
                },
            );

        current = next;
    }

    selected
}

/// Replace the points of each occupied voxel by their centroid.
///
/// Voxels are cubes of edge `voxel_size` anchored at the cloud's minimum
/// corner and are emitted in order of first occupancy. Colors, when present,
/// are averaged per voxel.
pub fn voxel_downsample(cloud: &PointCloud, voxel_size: f32) -> PointCloud {
    if cloud.is_empty() || !(voxel_size.is_finite() && voxel_size > 0.0) {
        return cloud.clone();
    }

    let origin = [
        cloud.x.iter().copied().fold(f32::INFINITY, f32::min),
        cloud.y.iter().copied().fold(f32::INFINITY, f32::min),
        cloud.z.iter().copied().fold(f32::INFINITY, f32::min),
    ];

    struct Cell {
        sum: [f64; 3],
        color_sum: [u64; 3],
        count: u64,
    }

    let mut slots: HashMap<[i64; 3], usize> = HashMap::new();
    let mut cells: Vec<Cell> = Vec::new();

    for i in 0..cloud.len() {
        let p = cloud.point(i);
        let key = [
            ((p[0] - origin[0]) / voxel_size).floor() as i64,
            ((p[1] - origin[1]) / voxel_size).floor() as i64,
            ((p[2] - origin[2]) / voxel_size).floor() as i64,
        ];

        let slot = *slots.entry(key).or_insert_with(|| {
            cells.push(Cell {
                sum: [0.0; 3],
                color_sum: [0; 3],
                count: 0,
            });
            cells.len() - 1
        });

        let cell = &mut cells[slot];
        for axis in 0..3 {
            cell.sum[axis] += p[axis] as f64;
        }
        if let Some(colors) = &cloud.colors {
            for ch in 0..3 {
                cell.color_sum[ch] += colors[i][ch] as u64;
            }
        }
        cell.count += 1;
    }

    let mut out = PointCloud::with_capacity(cells.len());
    let mut colors = cloud.colors.as_ref().map(|_| Vec::with_capacity(cells.len()));

    for cell in &cells {
        let n = cell.count as f64;
        out.push(
            (cell.sum[0] / n) as f32,
            (cell.sum[1] / n) as f32,
            (cell.sum[2] / n) as f32,
        );
        if let Some(colors) = colors.as_mut() {
            colors.push(cell.color_sum.map(|s| (s / cell.count) as u8));
        }
    }

    out.colors = colors;
    out
}

/// Reduce `cloud` to at most `target` points with the given method.
///
/// Random and FPS return exactly `min(len, target)` points. The voxel variant
/// may return fewer than `target` when the grid leaves fewer occupied voxels.
pub fn sample_points<R: Rng + ?Sized>(
    cloud: &PointCloud,
    target: usize,
    method: &SamplingMethod,
    rng: &mut R,
) -> PointCloud {
    if cloud.len() <= target {
        return cloud.clone();
    }

    match *method {
        SamplingMethod::Random => cloud.select(&random_indices(cloud.len(), target, rng)),
        SamplingMethod::FarthestPoint => {
            cloud.select(&farthest_point_indices(&cloud.to_coords(), target, rng))
        }
        SamplingMethod::VoxelThenFarthestPoint { voxel_size } => {
            let voxels = voxel_downsample(cloud, voxel_size);
            log::debug!(
                "voxel grid {} kept {} of {} points",
                voxel_size,
                voxels.len(),
                cloud.len()
            );
            let picked = farthest_point_indices(&voxels.to_coords(), target, rng);
            voxels.select(&picked)
        }
    }
}

/// Resize a cloud to exactly `target` points for a fixed-input model.
///
/// Larger clouds are randomly subsampled. Smaller clouds are grown by
/// appending copies of the whole cloud while a full copy still fits, then a
/// random subset of the grown cloud fills the remainder.
pub fn resize_to<R: Rng + ?Sized>(cloud: &PointCloud, target: usize, rng: &mut R) -> PointCloud {
    let n = cloud.len();
    if n == target || n == 0 {
        return cloud.clone();
    }
    if n > target {
        return cloud.select(&random_indices(n, target, rng));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    while indices.len() * 2 <= target {
        indices.extend_from_within(..);
    }
    let need = target - indices.len();
    let extra: Vec<usize> = random_indices(indices.len(), need, rng)
        .into_iter()
        .map(|i| indices[i])
        .collect();
    indices.extend(extra);

    cloud.select(&indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn random_cube(n: usize, seed: u64) -> PointCloud {
        let mut rng = StdRng::seed_from_u64(seed);
        let coords: Vec<[f32; 3]> = (0..n)
            .map(|_| [rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>()])
            .collect();
        PointCloud::from_coords(&coords)
    }

    fn min_pairwise_distance(coords: &[[f32; 3]]) -> f32 {
        let mut best = f32::INFINITY;
        for i in 0..coords.len() {
            for j in (i + 1)..coords.len() {
                let d: f32 = (0..3).map(|a| (coords[i][a] - coords[j][a]).powi(2)).sum();
                best = best.min(d);
            }
        }
        best.sqrt()
    }

    #[test]
    fn test_method_names() {
        assert_eq!("fps".parse::<SamplingMethod>(), Ok(SamplingMethod::FarthestPoint));
        assert_eq!("RANDOM".parse::<SamplingMethod>(), Ok(SamplingMethod::Random));
        assert_eq!(
            SamplingMethod::from_name("voxel", 0.05),
            Ok(SamplingMethod::VoxelThenFarthestPoint { voxel_size: 0.05 })
        );
        assert_eq!(
            "poisson".parse::<SamplingMethod>(),
            Err(SamplingError::UnsupportedMethod("poisson".to_string()))
        );
        assert_eq!(
            SamplingMethod::from_name("voxel", 0.0),
            Err(SamplingError::InvalidVoxelSize(0.0))
        );
    }

    #[test]
    fn test_small_cloud_unchanged() {
        let cloud = random_cube(50, 1);
        let mut rng = StdRng::seed_from_u64(3);
        for method in [
            SamplingMethod::Random,
            SamplingMethod::FarthestPoint,
            SamplingMethod::VoxelThenFarthestPoint { voxel_size: 0.5 },
        ] {
            assert_eq!(sample_points(&cloud, 50, &method, &mut rng), cloud);
            assert_eq!(sample_points(&cloud, 80, &method, &mut rng), cloud);
        }
    }

    #[test]
    fn test_random_indices_distinct() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut picked = random_indices(1000, 100, &mut rng);
        assert_eq!(picked.len(), 100);
        picked.sort_unstable();
        picked.dedup();
        assert_eq!(picked.len(), 100);
        assert!(picked.iter().all(|&i| i < 1000));
    }

    #[test]
    fn test_fps_cardinality_and_distinct() {
        let cloud = random_cube(2000, 5);
        let mut rng = StdRng::seed_from_u64(9);
        let mut picked = farthest_point_indices(&cloud.to_coords(), 256, &mut rng);
        assert_eq!(picked.len(), 256);
        picked.sort_unstable();
        picked.dedup();
        assert_eq!(picked.len(), 256);
    }

    #[test]
    fn test_fps_never_repeats_on_duplicates() {
        let coords = [
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ];
        for seed in 0..6 {
            let mut picked = farthest_point_indices(&coords, 5, &mut StdRng::seed_from_u64(seed));
            assert_eq!(picked.len(), 5);
            picked.sort_unstable();
            picked.dedup();
            assert_eq!(picked.len(), 5, "seed {}", seed);
        }
    }

    #[test]
    fn test_fps_reproducible_with_seed() {
        let coords = random_cube(1500, 2).to_coords();
        let a = farthest_point_indices(&coords, 128, &mut StdRng::seed_from_u64(42));
        let b = farthest_point_indices(&coords, 128, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_fps_matches_greedy_with_lowest_index_ties() {
        // Integer grid: lots of exact distance ties.
        let mut coords = Vec::new();
        for x in 0..6 {
            for y in 0..6 {
                for z in 0..3 {
                    coords.push([x as f32, y as f32, z as f32]);
                }
            }
        }

        let picked = farthest_point_indices(&coords, 20, &mut StdRng::seed_from_u64(5));
        assert_eq!(picked.len(), 20);

        let dist = |a: [f32; 3], b: [f32; 3]| -> f32 {
            (0..3).map(|k| (a[k] - b[k]).powi(2)).sum()
        };
        for step in 1..picked.len() {
            let nearest: Vec<f32> = coords
                .iter()
                .map(|&p| {
                    picked[..step]
                        .iter()
                        .map(|&s| dist(p, coords[s]))
                        .fold(f32::INFINITY, f32::min)
                })
                .collect();
            let best = nearest.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let expected = nearest.iter().position(|&d| d == best).unwrap();
            assert_eq!(picked[step], expected, "step {}", step);
        }
    }

    #[test]
    fn test_fps_beats_contiguous_slice() {
        let cloud = random_cube(10_000, 17);
        let coords = cloud.to_coords();
        let mut rng = StdRng::seed_from_u64(23);

        let picked = farthest_point_indices(&coords, 2048, &mut rng);
        assert_eq!(picked.len(), 2048);

        let fps_coords: Vec<[f32; 3]> = picked.iter().map(|&i| coords[i]).collect();
        let slice_coords = &coords[..2048];
        assert!(min_pairwise_distance(&fps_coords) > min_pairwise_distance(slice_coords));
    }

    #[test]
    fn test_fps_spreads_better_than_random_on_average() {
        let cloud = random_cube(800, 31);
        let coords = cloud.to_coords();
        let mut rng = StdRng::seed_from_u64(77);

        let (mut fps_total, mut random_total) = (0.0, 0.0);
        for _ in 0..5 {
            let fps: Vec<[f32; 3]> = farthest_point_indices(&coords, 64, &mut rng)
                .into_iter()
                .map(|i| coords[i])
                .collect();
            let random: Vec<[f32; 3]> = random_indices(coords.len(), 64, &mut rng)
                .into_iter()
                .map(|i| coords[i])
                .collect();
            fps_total += min_pairwise_distance(&fps);
            random_total += min_pairwise_distance(&random);
        }
        assert!(fps_total > random_total);
    }

    #[test]
    fn test_voxel_downsample_centroids() {
        let mut cloud = PointCloud::new();
        cloud.push_with_color(0.0, 0.0, 0.0, [0, 0, 0]);
        cloud.push_with_color(0.1, 0.1, 0.1, [100, 200, 50]);
        cloud.push_with_color(1.0, 1.0, 1.0, [9, 9, 9]);

        let voxels = voxel_downsample(&cloud, 0.5);
        assert_eq!(voxels.len(), 2);
        assert!((voxels.x[0] - 0.05).abs() < 1e-6);
        assert_eq!(voxels.point(1), [1.0, 1.0, 1.0]);
        assert_eq!(voxels.colors, Some(vec![[50, 100, 25], [9, 9, 9]]));
    }

    #[test]
    fn test_voxel_fps_may_fall_short() {
        // 4000 points packed into two tight clumps leave only two voxels.
        let mut cloud = PointCloud::new();
        for i in 0..4000 {
            let jitter = (i % 10) as f32 * 1e-4;
            let base = if i % 2 == 0 { 0.0 } else { 0.5 };
            cloud.push(base + jitter, base, base);
        }

        let method = SamplingMethod::VoxelThenFarthestPoint { voxel_size: 0.02 };
        let sampled = sample_points(&cloud, 2048, &method, &mut StdRng::seed_from_u64(1));
        assert_eq!(sampled.len(), 2);
    }

    #[test]
    fn test_voxel_fps_hits_target_when_dense() {
        let cloud = random_cube(5000, 8);
        let method = SamplingMethod::VoxelThenFarthestPoint { voxel_size: 0.02 };
        let sampled = sample_points(&cloud, 512, &method, &mut StdRng::seed_from_u64(4));
        assert_eq!(sampled.len(), 512);
    }

    #[test]
    fn test_resize_to_grows_and_shrinks() {
        let cloud = random_cube(300, 12);
        let mut rng = StdRng::seed_from_u64(6);

        let grown = resize_to(&cloud, 2048, &mut rng);
        assert_eq!(grown.len(), 2048);
        // The first copy keeps the original order.
        assert_eq!(grown.point(0), cloud.point(0));
        assert_eq!(grown.point(299), cloud.point(299));

        let shrunk = resize_to(&cloud, 100, &mut rng);
        assert_eq!(shrunk.len(), 100);
    }
}
