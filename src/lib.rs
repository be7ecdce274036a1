//! Point cloud preparation and restoration for shape-completion models.
//!
//! This crate provides tools for:
//! - Loading and writing PLY, CSV and XYZ point clouds
//! - Normalizing clouds into a unit frame and restoring them afterwards
//! - Random, farthest-point and voxel+FPS sampling (parallelized)
//! - Statistical outlier removal
//! - Running single files and folders through a completion model with
//!   per-file failure isolation
//!
//! # Example
//!
//! ```no_run
//! use completion_pipeline::core::{normalize, read_point_cloud, restore};
//! use completion_pipeline::processors::{sample_points, SamplingMethod};
//! use rand::SeedableRng;
//!
//! let cloud = read_point_cloud("scan.ply").unwrap();
//! let (normalized, params) = normalize(&cloud).unwrap();
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let sampled = sample_points(&normalized, 2048, &SamplingMethod::FarthestPoint, &mut rng);
//! let back = restore(&sampled, &params).unwrap();
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod pipeline;
pub mod processors;

pub use config::PipelineConfig;
pub use core::loaders::PointCloud;
pub use pipeline::{CompletionModel, CompletionPipeline, CompletionService};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
