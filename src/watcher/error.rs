//! Error types for the watch pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher operations.
///
/// `InitFailed` and `WalkFailed` are fatal at startup; the rest are logged.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot walk {path}: {reason}")]
    WalkFailed { path: PathBuf, reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("File system event error: {details}")]
    EventError { details: String },

    #[error("Stage '{stage}' stopped abnormally: {reason}")]
    StageFailed { stage: &'static str, reason: String },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}

impl WatchError {
    /// Wrap an error delivered on the notification stream.
    pub fn event(e: notify::Error) -> Self {
        WatchError::EventError {
            details: e.to_string(),
        }
    }
}
