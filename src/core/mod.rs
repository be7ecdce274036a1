//! Core data types, I/O and coordinate transforms.

pub mod loaders;
pub mod transforms;
pub mod writers;

pub use loaders::{read_point_cloud, LoaderError, PointCloud};
pub use transforms::{normalize, restore, NormalizationParams, TransformError};
pub use writers::{write_point_cloud, write_ply, WriteError};
