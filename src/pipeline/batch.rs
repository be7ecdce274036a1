//! Per-file completion jobs and folder batches.
//!
//! One file moves through
//! `read -> normalize -> sample -> filter -> inference -> restore -> filter -> write`,
//! ending as [`JobStatus::Success`] or [`JobStatus::Failed`]. Files named in
//! the skip list are copied unchanged and end as [`JobStatus::Copied`].
//! A failure only ever affects its own file; the batch carries on and reports
//! every file in [`BatchSummary`].

use std::fmt::Display;
use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::core::loaders::{read_point_cloud, PointCloud};
use crate::core::transforms::TransformError;
use crate::core::writers::write_point_cloud;
use crate::processors::sampling::{resize_to, sample_points, SamplingError, SamplingMethod};

use super::inference::{run_with_timeout, CompletionModel, InferenceError};
use super::registry::{JobKey, ParamRegistry};
use super::stages;

/// Errors that end a job (or, for folder-level problems, a whole batch).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("input point cloud is empty")]
    EmptyInput,

    #[error("degenerate geometry: all points coincide")]
    DegenerateGeometry,

    #[error("unsupported sampling method '{0}'")]
    UnsupportedSamplingMethod(String),

    #[error("no normalization parameters stored for job {0}")]
    MissingParams(String),

    #[error("I/O error on {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("inference failed: {0}")]
    InferenceFailure(String),

    #[error("no files ending in '{extension}' found in {folder}")]
    NoMatchingFiles { folder: PathBuf, extension: String },

    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("processing panicked: {0}")]
    Panicked(String),
}

impl PipelineError {
    pub(crate) fn io(path: &Path, reason: impl Display) -> Self {
        PipelineError::Io {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

impl From<TransformError> for PipelineError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::EmptyInput => PipelineError::EmptyInput,
            TransformError::DegenerateGeometry => PipelineError::DegenerateGeometry,
            other => PipelineError::InvalidInput(other.to_string()),
        }
    }
}

impl From<SamplingError> for PipelineError {
    fn from(err: SamplingError) -> Self {
        match err {
            SamplingError::UnsupportedMethod(name) => PipelineError::UnsupportedSamplingMethod(name),
            other => PipelineError::InvalidInput(other.to_string()),
        }
    }
}

impl From<InferenceError> for PipelineError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::Timeout(limit) => PipelineError::Timeout(limit),
            other => PipelineError::InferenceFailure(other.to_string()),
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(msg) => msg.to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}

/// Run one unit of work, turning a panic into [`PipelineError::Panicked`]
/// so it stays confined to its own file.
fn contain_panic<T>(work: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(work))
        .unwrap_or_else(|payload| Err(PipelineError::Panicked(panic_message(payload))))
}

/// Per-request sampling choices.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOptions {
    pub target_points: usize,
    pub method: SamplingMethod,
}

impl JobOptions {
    pub fn new(target_points: usize, method: SamplingMethod) -> Self {
        Self {
            target_points,
            method,
        }
    }

    /// Options from the `sampling` section of a config.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(
            config.sampling.target_points,
            config.sampling.method()?,
        ))
    }
}

/// Terminal state of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Failed,
    Copied,
}

/// Outcome of one file in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub file: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate over a folder batch.
///
/// `successful` counts both processed and copied files; `completed_files`
/// and `copied_files` split it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_files: usize,
    pub successful: usize,
    pub copied_files: usize,
    pub completed_files: usize,
    pub results: Vec<BatchResult>,
}

impl BatchSummary {
    pub fn from_results(results: Vec<BatchResult>) -> Self {
        let completed_files = results
            .iter()
            .filter(|r| r.status == JobStatus::Success)
            .count();
        let copied_files = results
            .iter()
            .filter(|r| r.status == JobStatus::Copied)
            .count();
        Self {
            total_files: results.len(),
            successful: completed_files + copied_files,
            copied_files,
            completed_files,
            results,
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &BatchResult> {
        self.results.iter().filter(|r| r.status == JobStatus::Failed)
    }
}

/// One discovered input file and where its output goes.
#[derive(Debug, Clone, PartialEq)]
pub struct FileJob {
    /// Position in sorted enumeration order.
    pub index: usize,
    /// Input file name.
    pub file: String,
    pub input: PathBuf,
    pub output: PathBuf,
    /// Copy instead of processing.
    pub skip: bool,
}

/// Output path for a processed file: `<stem>.<output_extension>`.
pub fn output_path_for(input: &Path, output_dir: &Path, output_extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = output_extension.trim_start_matches('.');
    output_dir.join(format!("{}.{}", stem, extension))
}

/// Find files in `input_dir` whose names end with `extension`
/// (case-insensitive), sorted by name.
///
/// Skipped files keep their name in `output_dir`; the rest are renamed with
/// [`output_path_for`].
///
/// # Errors
///
/// - [`PipelineError::InvalidInput`] if `input_dir` is not a directory
/// - [`PipelineError::NoMatchingFiles`] if nothing matches
pub fn discover_jobs(
    input_dir: &Path,
    output_dir: &Path,
    extension: &str,
    output_extension: &str,
    skip_files: &[String],
) -> Result<Vec<FileJob>> {
    if !input_dir.is_dir() {
        return Err(PipelineError::InvalidInput(format!(
            "input folder does not exist: {}",
            input_dir.display()
        )));
    }

    let suffix = extension.to_lowercase();
    let mut files: Vec<PathBuf> = fs::read_dir(input_dir)
        .map_err(|e| PipelineError::io(input_dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().to_lowercase().ends_with(&suffix))
                .unwrap_or(false)
        })
        .collect();

    if files.is_empty() {
        return Err(PipelineError::NoMatchingFiles {
            folder: input_dir.to_path_buf(),
            extension: extension.to_string(),
        });
    }
    files.sort();

    let jobs = files
        .into_iter()
        .enumerate()
        .map(|(index, input)| {
            let file = input
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let skip = skip_files.iter().any(|s| s == &file);
            let output = if skip {
                output_dir.join(&file)
            } else {
                output_path_for(&input, output_dir, output_extension)
            };
            FileJob {
                index,
                file,
                input,
                output,
                skip,
            }
        })
        .collect();

    Ok(jobs)
}

fn run_one<F>(job: &FileJob, process: &F) -> BatchResult
where
    F: Fn(&FileJob) -> Result<()>,
{
    let (status, outcome) = if job.skip {
        let copied = fs::copy(&job.input, &job.output)
            .map(|_| ())
            .map_err(|e| PipelineError::io(&job.input, e));
        (JobStatus::Copied, copied)
    } else {
        (JobStatus::Success, contain_panic(|| process(job)))
    };

    match outcome {
        Ok(()) => {
            debug!("{}: {:?} -> {}", job.file, status, job.output.display());
            BatchResult {
                file: job.file.clone(),
                status,
                output_path: Some(job.output.clone()),
                error: None,
            }
        }
        Err(e) => {
            warn!("{}: failed: {}", job.file, e);
            BatchResult {
                file: job.file.clone(),
                status: JobStatus::Failed,
                output_path: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Run `process` over every non-skipped job in parallel, copying skipped
/// ones. Results come back in job order whatever order they finish in.
///
/// `workers == 0` uses the global rayon pool.
pub fn run_jobs<F>(jobs: &[FileJob], workers: usize, process: F) -> Vec<BatchResult>
where
    F: Fn(&FileJob) -> Result<()> + Sync,
{
    let run_all = || -> Vec<BatchResult> {
        jobs.par_iter().map(|job| run_one(job, &process)).collect()
    };

    if workers == 0 {
        return run_all();
    }

    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(run_all),
        Err(e) => {
            warn!("could not build a {}-thread pool ({}), using the global pool", workers, e);
            run_all()
        }
    }
}

/// Random generator for one job. With a seed, job `stream` always gets the
/// same sequence.
pub fn job_rng(seed: Option<u64>, stream: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
        None => StdRng::from_entropy(),
    }
}

/// Completion jobs against one model, sharing a parameter registry.
pub struct CompletionPipeline {
    model: Arc<dyn CompletionModel>,
    registry: Arc<ParamRegistry>,
    config: PipelineConfig,
}

impl CompletionPipeline {
    pub fn new(model: Arc<dyn CompletionModel>, config: PipelineConfig) -> Self {
        let registry = match config.registry.ttl_secs {
            Some(secs) => ParamRegistry::with_ttl(Duration::from_secs(secs)),
            None => ParamRegistry::new(),
        };
        Self {
            model,
            registry: Arc::new(registry),
            config,
        }
    }

    /// Share an existing registry instead of the one built from config.
    pub fn with_registry(mut self, registry: Arc<ParamRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ParamRegistry> {
        &self.registry
    }

    /// Run one cloud through the whole job, returning it in its original
    /// frame.
    ///
    /// The normalization params are published under a fresh [`JobKey`]
    /// before inference and removed again afterwards, whether or not the
    /// model call succeeded.
    pub fn complete_cloud<R: Rng + ?Sized>(
        &self,
        cloud: &PointCloud,
        options: &JobOptions,
        label: &str,
        rng: &mut R,
    ) -> Result<PointCloud> {
        let prepared = stages::preprocess(
            cloud,
            options.target_points,
            &options.method,
            &self.config.outliers.pre,
            rng,
        )?;

        let mut input = prepared.cloud;
        let fixed_size = self
            .config
            .inference
            .input_points
            .or_else(|| self.model.input_points());
        if let Some(n) = fixed_size.filter(|&n| n > 0 && n != input.len()) {
            debug!("{}: resizing model input {} -> {}", label, input.len(), n);
            input = resize_to(&input, n, rng);
        }

        let key = JobKey::new(label);
        self.registry.put(key.clone(), prepared.params);

        let inferred = run_with_timeout(
            Arc::clone(&self.model),
            input,
            self.config.inference.timeout(),
        );
        let params = self.registry.take(&key);

        let completed = inferred?;
        let params = params.ok_or_else(|| PipelineError::MissingParams(key.to_string()))?;
        if completed.is_empty() {
            return Err(PipelineError::InferenceFailure(format!(
                "{} returned no points",
                self.model.name()
            )));
        }
        if let Some(index) = completed.first_non_finite() {
            return Err(PipelineError::InferenceFailure(format!(
                "{} returned a non-finite coordinate at point {}",
                self.model.name(),
                index
            )));
        }

        stages::postprocess(&completed, &params, &self.config.outliers.post)
    }

    fn process_job<R: Rng + ?Sized>(
        &self,
        input: &Path,
        output: &Path,
        options: &JobOptions,
        rng: &mut R,
    ) -> Result<usize> {
        let cloud = read_point_cloud(input).map_err(|e| PipelineError::io(input, e))?;
        let label = input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let completed = self.complete_cloud(&cloud, options, &label, rng)?;
        write_point_cloud(output, &completed).map_err(|e| PipelineError::io(output, e))?;
        Ok(completed.len())
    }

    /// Complete a single file. Failures come back as errors rather than a
    /// [`BatchResult`].
    pub fn complete_file(&self, input: &Path, output: &Path, options: &JobOptions) -> Result<PathBuf> {
        let mut rng = job_rng(self.config.sampling.seed, 0);
        let points = contain_panic(|| self.process_job(input, output, options, &mut rng))?;
        info!(
            "{} -> {} ({} points)",
            input.display(),
            output.display(),
            points
        );
        Ok(output.to_path_buf())
    }

    /// Complete every matching file in `input_dir`, writing into
    /// `output_dir` (created if missing).
    ///
    /// Only folder-level problems are errors; per-file failures are
    /// reported in the summary.
    pub fn complete_folder(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        options: &JobOptions,
        file_extension: &str,
        skip_files: &[String],
    ) -> Result<BatchSummary> {
        let jobs = discover_jobs(
            input_dir,
            output_dir,
            file_extension,
            &self.config.batch.output_extension,
            skip_files,
        )?;
        fs::create_dir_all(output_dir).map_err(|e| PipelineError::io(output_dir, e))?;

        let expired = self.registry.purge_expired();
        if expired > 0 {
            warn!("dropped {} expired registry entries", expired);
        }

        info!(
            "completing {} files from {} ({} points, {})",
            jobs.len(),
            input_dir.display(),
            options.target_points,
            options.method
        );

        let results = run_jobs(&jobs, self.config.batch.workers, |job| {
            let mut rng = job_rng(self.config.sampling.seed, job.index as u64);
            self.process_job(&job.input, &job.output, options, &mut rng)
                .map(|_| ())
        });

        let summary = BatchSummary::from_results(results);
        info!(
            "batch done: {}/{} successful ({} completed, {} copied)",
            summary.successful, summary.total_files, summary.completed_files, summary.copied_files
        );
        Ok(summary)
    }
}

fn downsample_job<R: Rng + ?Sized>(
    input: &Path,
    output: &Path,
    options: &JobOptions,
    rng: &mut R,
) -> Result<usize> {
    let cloud = read_point_cloud(input).map_err(|e| PipelineError::io(input, e))?;
    if cloud.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    let sampled = sample_points(&cloud, options.target_points, &options.method, rng);
    write_point_cloud(output, &sampled).map_err(|e| PipelineError::io(output, e))?;
    Ok(sampled.len())
}

/// Sample one file without normalizing, filtering or running a model.
pub fn downsample_file(
    input: &Path,
    output: &Path,
    options: &JobOptions,
    seed: Option<u64>,
) -> Result<usize> {
    downsample_job(input, output, options, &mut job_rng(seed, 0))
}

/// Sample-only pass over a folder, with the same discovery, skip and
/// reporting rules as [`CompletionPipeline::complete_folder`].
pub fn downsample_folder(
    input_dir: &Path,
    output_dir: &Path,
    options: &JobOptions,
    config: &PipelineConfig,
    skip_files: &[String],
) -> Result<BatchSummary> {
    let jobs = discover_jobs(
        input_dir,
        output_dir,
        &config.batch.file_extension,
        &config.batch.output_extension,
        skip_files,
    )?;
    fs::create_dir_all(output_dir).map_err(|e| PipelineError::io(output_dir, e))?;

    info!("downsampling {} files from {}", jobs.len(), input_dir.display());
    let results = run_jobs(&jobs, config.batch.workers, |job| {
        let mut rng = job_rng(config.sampling.seed, job.index as u64);
        downsample_job(&job.input, &job.output, options, &mut rng).map(|_| ())
    });
    Ok(BatchSummary::from_results(results))
}
