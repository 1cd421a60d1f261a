//! Wires the stages together and owns the platform watcher.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::Event;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::tree::{NotifyRegistrar, register_tree};
use super::{Debouncer, Dispatcher, EventFilter, WatchError};
use crate::config::WatchConfig;
use crate::generation::{GenerateOptions, Generator};
use crate::report::Reporter;

/// Raw notifications buffered between the platform callback and the filter.
pub const RAW_QUEUE_CAPACITY: usize = 1024;

/// Filtered events buffered ahead of the debouncer.
pub const CHANGE_QUEUE_CAPACITY: usize = 256;

/// A configured watch session.
pub struct WatchPipeline {
    root: PathBuf,
    config: WatchConfig,
    generator: Arc<dyn Generator>,
    reporter: Reporter,
}

/// Running filter, debouncer and dispatcher tasks.
pub struct Stages {
    /// Input of the filter stage.
    pub raw_tx: mpsc::Sender<notify::Result<Event>>,
    /// Directories created after startup, awaiting registration.
    pub new_dirs: mpsc::UnboundedReceiver<PathBuf>,
    pub handles: StageHandles,
}

pub struct StageHandles(Vec<(&'static str, JoinHandle<()>)>);

impl StageHandles {
    /// Wait for every stage to finish.
    pub async fn join(self) -> Result<(), WatchError> {
        let mut first_failure = None;
        for (stage, handle) in self.0 {
            if let Err(e) = handle.await {
                tracing::error!("[watch] stage {stage} failed: {e}");
                first_failure.get_or_insert(WatchError::StageFailed {
                    stage,
                    reason: e.to_string(),
                });
            }
        }
        first_failure.map_or(Ok(()), Err)
    }
}

impl Stages {
    /// Close the input and wait for queued work to drain.
    pub async fn finish(self) -> Result<(), WatchError> {
        drop(self.raw_tx);
        drop(self.new_dirs);
        self.handles.join().await
    }
}

impl WatchPipeline {
    pub fn builder() -> WatchPipelineBuilder {
        WatchPipelineBuilder::new()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Spawn the filter, debouncer and dispatcher. All of them stop when
    /// `cancel` fires.
    pub fn spawn_stages(&self, cancel: &CancellationToken) -> Stages {
        let (raw_tx, raw_rx) = mpsc::channel(RAW_QUEUE_CAPACITY);
        let (change_tx, change_rx) = mpsc::channel(CHANGE_QUEUE_CAPACITY);
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (dir_tx, new_dirs) = mpsc::unbounded_channel();

        let filter = EventFilter::new(self.config.clone(), self.root.clone(), self.reporter);
        let debouncer = Debouncer::new(self.config.debounce);
        let dispatcher = Dispatcher::new(
            self.generator.clone(),
            self.config.markers.clone(),
            GenerateOptions {
                use_weak_model: self.config.use_weak_model,
            },
            self.reporter,
        );

        let handles = vec![
            (
                "filter",
                tokio::spawn(filter.run(raw_rx, change_tx, dir_tx, cancel.clone())),
            ),
            (
                "debounce",
                tokio::spawn(debouncer.run(change_rx, ready_tx, cancel.clone())),
            ),
            (
                "dispatch",
                tokio::spawn(dispatcher.run(ready_rx, cancel.clone())),
            ),
        ];

        Stages {
            raw_tx,
            new_dirs,
            handles: StageHandles(handles),
        }
    }

    /// Watch until `cancel` fires.
    ///
    /// Fails only at startup: when the platform watcher cannot be created or
    /// the root cannot be walked.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), WatchError> {
        let stop = cancel.child_token();
        let Stages {
            raw_tx,
            mut new_dirs,
            handles,
        } = self.spawn_stages(&stop);

        let forward = raw_tx.clone();
        drop(raw_tx);
        let watcher = match notify::recommended_watcher(move |res: notify::Result<Event>| {
            forward_notification(&forward, res)
        }) {
            Ok(watcher) => watcher,
            Err(e) => {
                stop.cancel();
                handles.join().await?;
                return Err(e.into());
            }
        };

        let mut registrar = NotifyRegistrar::new(watcher);
        let registered = match register_tree(&self.root, &self.config.ignore_dirs, &mut registrar)
        {
            Ok(registered) => registered,
            Err(e) => {
                stop.cancel();
                drop(registrar);
                handles.join().await?;
                return Err(e);
            }
        };

        self.reporter.watching(&self.root, registered.len());
        crate::log_event!(
            "watch",
            "started",
            "{} directories, debounce {:?}",
            registered.len(),
            self.config.debounce
        );

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                Some(dir) = new_dirs.recv() => {
                    match register_tree(&dir, &self.config.ignore_dirs, &mut registrar) {
                        Ok(added) => crate::debug_event!(
                            "watch",
                            "registered new directory",
                            "{} ({} directories)",
                            dir.display(),
                            added.len()
                        ),
                        Err(e) => tracing::warn!("[watch] {e}"),
                    }
                }
            }
        }

        drop(registrar);
        handles.join().await?;
        crate::log_event!("watch", "stopped");
        Ok(())
    }
}

/// Hand one notification from the platform callback to the filter without
/// blocking the callback thread.
fn forward_notification(tx: &mpsc::Sender<notify::Result<Event>>, res: notify::Result<Event>) {
    match tx.try_send(res) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            tracing::warn!("[watch] event queue full, dropping notification");
        }
        Err(TrySendError::Closed(_)) => {}
    }
}

pub struct WatchPipelineBuilder {
    root: Option<PathBuf>,
    config: Option<WatchConfig>,
    generator: Option<Arc<dyn Generator>>,
    reporter: Option<Reporter>,
}

impl WatchPipelineBuilder {
    pub fn new() -> Self {
        Self {
            root: None,
            config: None,
            generator: None,
            reporter: None,
        }
    }

    /// Directory to watch.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn config(mut self, config: WatchConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Defaults to a reporter at the configured verbosity.
    pub fn reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn build(self) -> Result<WatchPipeline, WatchError> {
        let config = self.config.ok_or_else(|| WatchError::InitFailed {
            reason: "watch configuration is required".to_string(),
        })?;

        let generator = self.generator.ok_or_else(|| WatchError::InitFailed {
            reason: "generator is required".to_string(),
        })?;

        let root = match self.root {
            Some(root) => root,
            None => std::env::current_dir().map_err(|e| WatchError::InitFailed {
                reason: format!("cannot determine current directory: {e}"),
            })?,
        };

        let reporter = self
            .reporter
            .unwrap_or_else(|| Reporter::new(config.verbosity));

        Ok(WatchPipeline {
            root,
            config,
            generator,
            reporter,
        })
    }
}

impl Default for WatchPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
