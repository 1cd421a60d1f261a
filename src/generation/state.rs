//! Session bookkeeping shared with the generation backend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Working state handed to every generation call.
///
/// Owned by the dispatcher; the backend only ever sees a shared borrow.
#[derive(Debug, Default, Clone)]
pub struct SessionState {
    /// File the in-flight request is about.
    current: Option<PathBuf>,
    file_last_access: HashMap<PathBuf, DateTime<Utc>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a request for `path`: it becomes the current file and its access
    /// time is recorded.
    pub fn begin(&mut self, path: &Path, at: DateTime<Utc>) {
        self.current = Some(path.to_path_buf());
        self.record_access(path, at);
    }

    /// The file the in-flight request is about.
    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    /// Mark `path` as accessed at `at`. Later timestamps replace earlier ones.
    pub fn record_access(&mut self, path: &Path, at: DateTime<Utc>) {
        self.file_last_access
            .entry(path.to_path_buf())
            .and_modify(|last| {
                if at > *last {
                    *last = at;
                }
            })
            .or_insert(at);
    }

    pub fn last_accessed(&self, path: &Path) -> Option<DateTime<Utc>> {
        self.file_last_access.get(path).copied()
    }
}
