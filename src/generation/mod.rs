//! Generation collaborator interface.
//!
//! The watcher never interprets generated text; it hands an instruction and
//! the session bookkeeping to a [`Generator`] and displays what comes back.

mod command;
mod state;

pub use command::CommandGenerator;
pub use state::SessionState;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Token accounting reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    /// Cost in USD when the backend reports one.
    pub cost_usd: Option<f64>,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_write_tokens + self.cache_read_tokens
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens() == 0 && self.cost_usd.is_none()
    }
}

/// Result text plus usage for one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOutput {
    pub text: String,
    pub usage: Usage,
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateOptions {
    /// Select the lighter-weight backend.
    pub use_weak_model: bool,
}

/// Errors from a generation call. None of them stop the pipeline.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("backend reported an error: {message}")]
    Reported { message: String },

    #[error("generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("could not parse generation output: {reason}")]
    InvalidOutput { reason: String },
}

/// The external backend invoked by the dispatcher.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Run one generation request to completion.
    async fn generate(
        &self,
        instruction: &str,
        state: &SessionState,
        options: GenerateOptions,
    ) -> Result<GenerationOutput, GenerationError>;
}
