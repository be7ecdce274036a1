//! Request and response payloads for a completion service, and the handlers
//! that map them onto a [`CompletionPipeline`].
//!
//! Transport is left to the caller: every payload is a serde type, and
//! [`ServiceError::status_code`] says how a failure should be reported.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::processors::sampling::SamplingMethod;

use super::batch::{BatchSummary, CompletionPipeline, JobOptions, PipelineError};

/// Errors returned to a service caller.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ServiceError {
    /// HTTP-style status: 400 for bad requests, 500 for processing failures.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::InvalidRequest(_) => 400,
            ServiceError::Pipeline(
                PipelineError::UnsupportedSamplingMethod(_)
                | PipelineError::NoMatchingFiles { .. }
                | PipelineError::InvalidInput(_),
            ) => 400,
            ServiceError::Pipeline(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

fn default_target_points() -> usize {
    4096
}

fn default_sampling_method() -> String {
    "fps".to_string()
}

fn default_file_extension() -> String {
    ".ply".to_string()
}

/// Complete one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRequest {
    #[serde(alias = "input_path")]
    pub input_file: PathBuf,

    #[serde(alias = "output_path")]
    pub output_file: PathBuf,

    #[serde(default = "default_target_points")]
    pub target_points: usize,

    #[serde(default = "default_sampling_method")]
    pub sampling_method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileResponse {
    pub status: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

/// Complete every matching file in a folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderRequest {
    pub input_folder: PathBuf,

    pub output_folder: PathBuf,

    #[serde(default = "default_target_points")]
    pub target_points: usize,

    #[serde(default = "default_sampling_method")]
    pub sampling_method: String,

    #[serde(default = "default_file_extension")]
    pub file_extension: String,

    #[serde(default)]
    pub skip_files: Option<Vec<String>>,
}

/// Folder results: `{total_files, successful, copied_files, completed_files, results}`.
pub type FolderResponse = BatchSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Body sent back with a failed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl From<&ServiceError> for ErrorResponse {
    fn from(err: &ServiceError) -> Self {
        Self {
            detail: err.to_string(),
        }
    }
}

/// Request handlers over a shared pipeline.
pub struct CompletionService {
    pipeline: CompletionPipeline,
}

impl CompletionService {
    pub fn new(pipeline: CompletionPipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &CompletionPipeline {
        &self.pipeline
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "healthy".to_string(),
        }
    }

    fn options(&self, target_points: usize, sampling_method: &str) -> Result<JobOptions> {
        if target_points == 0 {
            return Err(ServiceError::InvalidRequest(
                "target_points must be greater than zero".to_string(),
            ));
        }
        let voxel_size = self.pipeline.config().sampling.voxel_size;
        let method = SamplingMethod::from_name(sampling_method, voxel_size)
            .map_err(PipelineError::from)?;
        Ok(JobOptions::new(target_points, method))
    }

    pub fn complete_file(&self, request: &FileRequest) -> Result<FileResponse> {
        if !request.input_file.is_file() {
            return Err(ServiceError::InvalidRequest(format!(
                "input file '{}' does not exist",
                request.input_file.display()
            )));
        }
        let options = self.options(request.target_points, &request.sampling_method)?;

        let output_path =
            self.pipeline
                .complete_file(&request.input_file, &request.output_file, &options)?;

        Ok(FileResponse {
            status: "success".to_string(),
            input_path: request.input_file.clone(),
            output_path,
        })
    }

    pub fn complete_folder(&self, request: &FolderRequest) -> Result<FolderResponse> {
        if !request.input_folder.is_dir() {
            return Err(ServiceError::InvalidRequest(format!(
                "input folder '{}' does not exist",
                request.input_folder.display()
            )));
        }
        let options = self.options(request.target_points, &request.sampling_method)?;
        let skip_files = match &request.skip_files {
            Some(files) => files.clone(),
            None => self.pipeline.config().batch.skip_files.clone(),
        };

        let summary = self.pipeline.complete_folder(
            &request.input_folder,
            &request.output_folder,
            &options,
            &request.file_extension,
            &skip_files,
        )?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::core::loaders::PointCloud;
    use crate::core::writers::write_ply;
    use crate::pipeline::inference::{CompletionModel, InferenceError};
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct Echo;

    impl CompletionModel for Echo {
        fn complete(&self, input: &PointCloud) -> std::result::Result<PointCloud, InferenceError> {
            Ok(input.clone())
        }
    }

    struct Broken;

    impl CompletionModel for Broken {
        fn complete(&self, _input: &PointCloud) -> std::result::Result<PointCloud, InferenceError> {
            Err(InferenceError::Failed("out of memory".to_string()))
        }
    }

    fn service(model: Arc<dyn CompletionModel>) -> CompletionService {
        let mut config = PipelineConfig::default();
        config.sampling.seed = Some(11);
        CompletionService::new(CompletionPipeline::new(model, config))
    }

    fn write_grid(path: &Path) {
        let coords: Vec<[f32; 3]> = (0..216)
            .map(|i| [(i % 6) as f32, ((i / 6) % 6) as f32, (i / 36) as f32])
            .collect();
        write_ply(path, &PointCloud::from_coords(&coords)).unwrap();
    }

    #[test]
    fn test_health() {
        let json = serde_json::to_value(service(Arc::new(Echo)).health()).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "healthy" }));
    }

    #[test]
    fn test_request_defaults() {
        let request: FolderRequest =
            serde_json::from_str(r#"{"input_folder": "in", "output_folder": "out"}"#).unwrap();
        assert_eq!(request.target_points, 4096);
        assert_eq!(request.sampling_method, "fps");
        assert_eq!(request.file_extension, ".ply");
        assert!(request.skip_files.is_none());

        let request: FileRequest =
            serde_json::from_str(r#"{"input_path": "a.ply", "output_path": "b.ply"}"#).unwrap();
        assert_eq!(request.input_file, PathBuf::from("a.ply"));
        assert_eq!(request.target_points, 4096);
    }

    #[test]
    fn test_complete_file() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("grid.ply");
        write_grid(&input);

        let request = FileRequest {
            input_file: input.clone(),
            output_file: dir.path().join("results").join("grid.ply"),
            target_points: 100,
            sampling_method: "random".to_string(),
        };
        let response = service(Arc::new(Echo)).complete_file(&request).unwrap();

        assert_eq!(response.status, "success");
        assert_eq!(response.input_path, input);
        assert!(response.output_path.exists());
    }

    #[test]
    fn test_missing_input_is_bad_request() {
        let dir = tempdir().unwrap();
        let request = FileRequest {
            input_file: dir.path().join("absent.ply"),
            output_file: dir.path().join("out.ply"),
            target_points: 10,
            sampling_method: "fps".to_string(),
        };
        let err = service(Arc::new(Echo)).complete_file(&request).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_unknown_method_is_bad_request() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("grid.ply");
        write_grid(&input);

        let request = FileRequest {
            input_file: input,
            output_file: dir.path().join("out.ply"),
            target_points: 10,
            sampling_method: "poisson".to_string(),
        };
        let err = service(Arc::new(Echo)).complete_file(&request).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Pipeline(PipelineError::UnsupportedSamplingMethod(_))
        ));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_model_failure_is_server_error() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("grid.ply");
        write_grid(&input);

        let request = FileRequest {
            input_file: input,
            output_file: dir.path().join("out.ply"),
            target_points: 50,
            sampling_method: "fps".to_string(),
        };
        let err = service(Arc::new(Broken)).complete_file(&request).unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert!(ErrorResponse::from(&err).detail.contains("out of memory"));
    }

    #[test]
    fn test_folder_failures_stay_in_results() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        write_grid(&input.path().join("one.ply"));
        write_grid(&input.path().join("two.ply"));

        let request = FolderRequest {
            input_folder: input.path().to_path_buf(),
            output_folder: output.path().to_path_buf(),
            target_points: 64,
            sampling_method: "fps".to_string(),
            file_extension: ".ply".to_string(),
            skip_files: Some(vec!["two.ply".to_string()]),
        };
        let response = service(Arc::new(Broken)).complete_folder(&request).unwrap();

        assert_eq!(response.total_files, 2);
        assert_eq!(response.successful, 1);
        assert_eq!(response.copied_files, 1);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["results"][0]["status"], "failed");
        assert_eq!(json["results"][1]["status"], "copied");
    }

    #[test]
    fn test_missing_folder_is_bad_request() {
        let dir = tempdir().unwrap();
        let request = FolderRequest {
            input_folder: dir.path().join("missing"),
            output_folder: dir.path().join("out"),
            target_points: 64,
            sampling_method: "fps".to_string(),
            file_extension: ".ply".to_string(),
            skip_files: None,
        };
        let err = service(Arc::new(Echo)).complete_folder(&request).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
    }
}
