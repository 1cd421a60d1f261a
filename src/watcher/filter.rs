//! Event filter stage.
//!
//! Turns raw notifications into [`ChangeEvent`]s. A notification is dropped
//! when its path crosses an ignored directory, its operation is neither a
//! create nor a write, the file looks binary, or the include pattern rejects
//! the file name. Newly created directories are forwarded for registration.

use std::io;
use std::path::{Path, PathBuf};

use glob::Pattern;
use notify::EventKind;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ChangeEvent, ChangeOp, WatchError};
use crate::config::WatchConfig;
use crate::report::Reporter;
use crate::utils::{SNIFF_LEN, has_ignored_segment, is_binary_content};

/// What survived the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Change(ChangeOp),
    NewDirectory,
}

/// Why a notification was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Ignored,
    Operation,
    Directory,
    Binary,
    Pattern,
}

#[derive(Debug)]
enum IncludePattern {
    Any,
    Valid(Pattern),
    /// A pattern that failed to compile matches nothing.
    Malformed,
}

pub struct EventFilter {
    root: PathBuf,
    config: WatchConfig,
    include: IncludePattern,
    reporter: Reporter,
}

impl EventFilter {
    pub fn new(config: WatchConfig, root: impl Into<PathBuf>, reporter: Reporter) -> Self {
        let include = match config.include_pattern.as_deref() {
            None => IncludePattern::Any,
            Some(raw) => match Pattern::new(raw) {
                Ok(pattern) => IncludePattern::Valid(pattern),
                Err(e) => {
                    tracing::warn!(
                        "[filter] include pattern '{raw}' is malformed ({e}); no file will match"
                    );
                    IncludePattern::Malformed
                }
            },
        };

        Self {
            root: root.into(),
            config,
            include,
            reporter,
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        has_ignored_segment(relative, &self.config.ignore_dirs)
    }

    fn include_matches(&self, path: &Path) -> bool {
        match &self.include {
            IncludePattern::Any => true,
            IncludePattern::Malformed => false,
            IncludePattern::Valid(pattern) => path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| pattern.matches(name)),
        }
    }

    /// Classify one path from a raw notification.
    pub async fn check(&self, path: &Path, kind: &EventKind) -> Result<Verdict, DropReason> {
        if self.is_ignored(path) {
            return Err(DropReason::Ignored);
        }
        let operation = ChangeOp::from_kind(kind).ok_or(DropReason::Operation)?;

        let metadata = tokio::fs::metadata(path).await;
        if metadata.as_ref().is_ok_and(|m| m.is_dir()) {
            return match operation {
                ChangeOp::Create => Ok(Verdict::NewDirectory),
                ChangeOp::Write => Err(DropReason::Directory),
            };
        }

        // Unreadable files pass through; the dispatcher reports them.
        if sniff(path).await.unwrap_or(false) {
            return Err(DropReason::Binary);
        }

        if !self.include_matches(path) {
            return Err(DropReason::Pattern);
        }

        Ok(Verdict::Change(operation))
    }

    /// Run until cancelled or until the raw notification channel closes.
    pub async fn run(
        self,
        mut raw: mpsc::Receiver<notify::Result<notify::Event>>,
        changes: mpsc::Sender<ChangeEvent>,
        new_dirs: mpsc::UnboundedSender<PathBuf>,
        cancel: CancellationToken,
    ) {
        loop {
            let notification = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                notification = raw.recv() => match notification {
                    Some(notification) => notification,
                    None => break,
                },
            };

            let event = match notification {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!("[filter] {}", WatchError::event(e));
                    continue;
                }
            };

            for path in &event.paths {
                match self.check(path, &event.kind).await {
                    Ok(Verdict::Change(operation)) => {
                        let change = ChangeEvent::new(path.clone(), operation);
                        crate::debug_event!("filter", "accepted", "{} ({operation})", path.display());
                        let sent = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return,
                            sent = changes.send(change) => sent,
                        };
                        if sent.is_err() {
                            return;
                        }
                    }
                    Ok(Verdict::NewDirectory) => {
                        crate::debug_event!("filter", "new directory", "{}", path.display());
                        let _ = new_dirs.send(path.clone());
                    }
                    Err(DropReason::Binary) => self.reporter.skipped_binary(path),
                    Err(reason) => {
                        tracing::trace!("[filter] dropped {} ({reason:?})", path.display());
                    }
                }
            }
        }
        crate::debug_event!("filter", "stopped");
    }
}

/// Read the head of `path` and apply the binary heuristic.
async fn sniff(path: &Path) -> io::Result<bool> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut head).await?;
    Ok(is_binary_content(&head))
}
