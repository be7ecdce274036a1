//! Configuration types for the completion pipeline.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::processors::outliers::{DEFAULT_NEIGHBORS, DEFAULT_STD_RATIO};
use crate::processors::sampling::{SamplingError, SamplingMethod, DEFAULT_VOXEL_SIZE};

/// Configuration for point sampling before inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Number of points handed to the model
    #[serde(default = "default_target_points")]
    pub target_points: usize,

    /// Sampling method name: random, fps or voxel
    #[serde(default = "default_method")]
    pub method: String,

    /// Voxel edge length for the voxel method, in normalized units
    #[serde(default = "default_voxel_size")]
    pub voxel_size: f32,

    /// Seed for reproducible sampling (random if unset)
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_target_points() -> usize {
    2048
}

fn default_method() -> String {
    "fps".to_string()
}

fn default_voxel_size() -> f32 {
    DEFAULT_VOXEL_SIZE
}

impl SamplingConfig {
    /// Resolve the configured method name.
    pub fn method(&self) -> Result<SamplingMethod, SamplingError> {
        SamplingMethod::from_name(&self.method, self.voxel_size)
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            target_points: default_target_points(),
            method: default_method(),
            voxel_size: default_voxel_size(),
            seed: None,
        }
    }
}

/// Parameters for one statistical outlier pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlierConfig {
    /// Run this pass at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Neighbours per point
    #[serde(default = "default_neighbors")]
    pub k: usize,

    /// Standard deviation multiplier
    #[serde(default = "default_std_ratio")]
    pub std_ratio: f32,
}

fn default_true() -> bool {
    true
}

fn default_neighbors() -> usize {
    DEFAULT_NEIGHBORS
}

fn default_std_ratio() -> f32 {
    DEFAULT_STD_RATIO
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            k: default_neighbors(),
            std_ratio: default_std_ratio(),
        }
    }
}

/// Outlier passes before inference (on the sampled cloud) and after
/// restoration (on the completed cloud).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutliersConfig {
    #[serde(default)]
    pub pre: OutlierConfig,

    #[serde(default)]
    pub post: OutlierConfig,
}

/// Configuration for the inference call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Per-call timeout in seconds (no limit if unset)
    #[serde(default)]
    pub timeout_secs: Option<f64>,

    /// Fixed model input size; sampled clouds are resized to it
    #[serde(default)]
    pub input_points: Option<usize>,
}

impl InferenceConfig {
    /// Timeout as a `Duration`, ignoring values that are not positive or
    /// do not fit in one.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|s| *s > 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
    }
}

/// Configuration for folder batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Input file suffix, matched case-insensitively
    #[serde(default = "default_file_extension")]
    pub file_extension: String,

    /// Extension given to processed outputs
    #[serde(default = "default_output_extension")]
    pub output_extension: String,

    /// Worker threads for parallel files (0 = rayon default)
    #[serde(default)]
    pub workers: usize,

    /// File names copied through without processing
    #[serde(default)]
    pub skip_files: Vec<String>,
}

fn default_file_extension() -> String {
    ".ply".to_string()
}

fn default_output_extension() -> String {
    "ply".to_string()
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            file_extension: default_file_extension(),
            output_extension: default_output_extension(),
            workers: 0,
            skip_files: Vec::new(),
        }
    }
}

/// Configuration for the job parameter registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Entries older than this are evicted (kept until removed if unset)
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub sampling: SamplingConfig,

    #[serde(default)]
    pub outliers: OutliersConfig,

    #[serde(default)]
    pub inference: InferenceConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub registry: RegistryConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_pipeline_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.sampling.target_points, 2048);
        assert_eq!(config.sampling.method().unwrap(), SamplingMethod::FarthestPoint);
        assert_eq!(config.outliers.pre.k, 20);
        assert_eq!(config.outliers.post.std_ratio, 2.0);
        assert_eq!(config.batch.file_extension, ".ply");
        assert!(config.inference.timeout().is_none());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "sampling:\n  method: voxel\n  voxel_size: 0.05\noutliers:\n  post:\n    k: 8\ninference:\n  timeout_secs: 1.5\n";
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(
            config.sampling.method().unwrap(),
            SamplingMethod::VoxelThenFarthestPoint { voxel_size: 0.05 }
        );
        assert_eq!(config.sampling.target_points, 2048);
        assert_eq!(config.outliers.post.k, 8);
        assert_eq!(config.outliers.pre.k, 20);
        assert_eq!(config.inference.timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_out_of_range_timeout_is_ignored() {
        let config: PipelineConfig = serde_yaml::from_str("inference:\n  timeout_secs: 1.0e30\n").unwrap();
        assert!(config.inference.timeout().is_none());

        let config: PipelineConfig = serde_yaml::from_str("inference:\n  timeout_secs: -3\n").unwrap();
        assert!(config.inference.timeout().is_none());
    }

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");

        let mut config = PipelineConfig::default();
        config.batch.skip_files = vec!["keep_me.ply".to_string()];
        config.to_yaml(&path).unwrap();

        let loaded = PipelineConfig::from_yaml(&path).unwrap();
        assert_eq!(loaded.batch.skip_files, config.batch.skip_files);
    }
}
