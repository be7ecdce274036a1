//! Job orchestration around an external completion model.

pub mod batch;
pub mod inference;
pub mod registry;
pub mod service;
pub mod stages;

pub use batch::{
    discover_jobs, downsample_file, downsample_folder, run_jobs, BatchResult, BatchSummary,
    CompletionPipeline, FileJob, JobOptions, JobStatus, PipelineError,
};
pub use inference::{run_with_timeout, CompletionModel, InferenceError};
pub use registry::{JobKey, ParamRegistry};
pub use service::{
    CompletionService, FileRequest, FileResponse, FolderRequest, FolderResponse, HealthResponse,
    ServiceError,
};
pub use stages::{postprocess, preprocess, Prepared};
