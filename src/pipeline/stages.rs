//! The two halves of a completion job around the model call.
//!
//! [`preprocess`] normalizes, samples and filters a raw cloud, returning the
//! model input together with the [`NormalizationParams`] needed later.
//! [`postprocess`] restores a completed cloud with those params and filters it
//! again. Each outlier pass has its own [`OutlierConfig`].
//!
//! When the model runs outside this process the params travel in a YAML
//! sidecar next to the preprocessed cloud (see [`sidecar_path`]).

use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::config::OutlierConfig;
use crate::core::loaders::PointCloud;
use crate::core::transforms::{normalize, restore, NormalizationParams};
use crate::processors::outliers::remove_statistical_outliers;
use crate::processors::sampling::{sample_points, SamplingMethod};

use super::batch::PipelineError;

/// Model input produced by [`preprocess`].
#[derive(Debug, Clone)]
pub struct Prepared {
    /// Normalized, sampled and filtered points.
    pub cloud: PointCloud,
    /// Transform to undo after inference.
    pub params: NormalizationParams,
}

/// Run one outlier pass, or return the cloud untouched when disabled.
pub fn apply_outlier_pass(cloud: PointCloud, pass: &OutlierConfig) -> PointCloud {
    if !pass.enabled {
        return cloud;
    }
    remove_statistical_outliers(&cloud, pass.k, pass.std_ratio).0
}

/// Normalize -> sample -> outlier filter.
pub fn preprocess<R: Rng + ?Sized>(
    cloud: &PointCloud,
    target_points: usize,
    method: &SamplingMethod,
    pre: &OutlierConfig,
    rng: &mut R,
) -> Result<Prepared, PipelineError> {
    let (normalized, params) = normalize(cloud)?;
    let sampled = sample_points(&normalized, target_points, method, rng);
    let filtered = apply_outlier_pass(sampled, pre);

    log::debug!(
        "preprocessed {} -> {} points ({}, scale {:.6})",
        cloud.len(),
        filtered.len(),
        method,
        params.scale
    );

    Ok(Prepared {
        cloud: filtered,
        params,
    })
}

/// Restore -> outlier filter.
pub fn postprocess(
    completed: &PointCloud,
    params: &NormalizationParams,
    post: &OutlierConfig,
) -> Result<PointCloud, PipelineError> {
    let restored = restore(completed, params)?;
    Ok(apply_outlier_pass(restored, post))
}

/// `<dir>/<stem>.params.yaml` for a preprocessed cloud at `cloud_path`.
pub fn sidecar_path(cloud_path: &Path) -> PathBuf {
    let stem = cloud_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    cloud_path.with_file_name(format!("{}.params.yaml", stem))
}

pub fn write_params(path: &Path, params: &NormalizationParams) -> Result<(), PipelineError> {
    let yaml = serde_yaml::to_string(params).map_err(|e| PipelineError::io(path, e))?;
    fs::write(path, yaml).map_err(|e| PipelineError::io(path, e))
}

/// Read a sidecar written by [`write_params`].
///
/// A missing file is [`PipelineError::MissingParams`]; a scale that is not
/// positive and finite is [`PipelineError::InvalidInput`].
pub fn read_params(path: &Path) -> Result<NormalizationParams, PipelineError> {
    if !path.is_file() {
        return Err(PipelineError::MissingParams(path.display().to_string()));
    }
    let yaml = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    let params: NormalizationParams =
        serde_yaml::from_str(&yaml).map_err(|e| PipelineError::io(path, e))?;
    if !params.is_valid() {
        return Err(PipelineError::InvalidInput(format!(
            "{}: scale {} is not a positive finite number",
            path.display(),
            params.scale
        )));
    }
    Ok(params)
}
