//! Normalized change events flowing from the filter to the dispatcher.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use notify::EventKind;
use notify::event::ModifyKind;

/// The operations that can lead to a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    Create,
    Write,
}

impl ChangeOp {
    /// Map a raw notification kind. Renames, removals, metadata changes and
    /// access events map to `None`.
    pub fn from_kind(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(ChangeOp::Create),
            EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => Some(ChangeOp::Write),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOp::Create => f.write_str("CREATE"),
            ChangeOp::Write => f.write_str("WRITE"),
        }
    }
}

/// One filtered notification. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub operation: ChangeOp,
    pub observed_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, operation: ChangeOp) -> Self {
        Self {
            path: path.into(),
            operation,
            observed_at: Utc::now(),
        }
    }
}
