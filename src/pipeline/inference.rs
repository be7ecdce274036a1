//! Boundary to the shape-completion model.
//!
//! The model itself lives outside this crate; it is anything implementing
//! [`CompletionModel`]. Calls go through [`run_with_timeout`], which runs the
//! model on its own thread so a slow call can be abandoned without holding
//! up other jobs.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::core::loaders::PointCloud;

/// Errors surfaced by a completion call.
#[derive(Debug, Error, PartialEq)]
pub enum InferenceError {
    #[error("inference failed: {0}")]
    Failed(String),

    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("inference worker stopped without a result")]
    WorkerLost,
}

/// A model that maps a sparse cloud in the normalized frame to a denser one
/// in the same frame.
pub trait CompletionModel: Send + Sync {
    /// Complete `input`.
    fn complete(&self, input: &PointCloud) -> Result<PointCloud, InferenceError>;

    /// Fixed number of input points the model expects, if any.
    fn input_points(&self) -> Option<usize> {
        None
    }

    /// Name used in logs.
    fn name(&self) -> &str {
        "completion-model"
    }
}

/// Run `model` on `input`, giving up after `timeout`.
///
/// The call runs on a dedicated thread. On timeout that thread is detached
/// and its eventual result dropped. A panicking model reports
/// [`InferenceError::WorkerLost`].
pub fn run_with_timeout(
    model: Arc<dyn CompletionModel>,
    input: PointCloud,
    timeout: Option<Duration>,
) -> Result<PointCloud, InferenceError> {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name(format!("inference-{}", model.name()))
        .spawn(move || {
            let result = model.complete(&input);
            // The receiver is gone if the caller already timed out.
            let _ = tx.send(result);
        })
        .map_err(|e| InferenceError::Failed(format!("could not start worker: {}", e)))?;

    match timeout {
        Some(limit) => match rx.recv_timeout(limit) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(InferenceError::Timeout(limit)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(InferenceError::WorkerLost),
        },
        None => rx.recv().map_err(|_| InferenceError::WorkerLost)?,
    }
}
