//! Watch command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::cli::WatchArgs;
use crate::config::Settings;
use crate::generation::CommandGenerator;
use crate::report::Reporter;
use crate::watcher::WatchPipeline;

/// Run the watch pipeline until SIGINT or SIGTERM.
pub async fn run_watch(args: &WatchArgs, mut settings: Settings) -> anyhow::Result<()> {
    args.apply(&mut settings.watch);
    let config = settings.watch.validate()?;

    crate::logging::init_with_config(&settings.logging, config.verbosity);

    let root = resolve_root(args.root.as_deref(), settings.workspace_root.as_deref())?;
    let generator = CommandGenerator::from_settings(&settings.generation, &root)?;
    let reporter = Reporter::new(config.verbosity);

    crate::debug_event!(
        "watch",
        "configured",
        "root={} ignore={:?} include={:?} markers=[{}]",
        root.display(),
        config.ignore_dirs,
        config.include_pattern,
        config.markers
    );

    let pipeline = WatchPipeline::builder()
        .root(&root)
        .config(config)
        .generator(Arc::new(generator))
        .reporter(reporter)
        .build()?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    pipeline
        .run(cancel)
        .await
        .with_context(|| format!("failed to watch {}", root.display()))?;

    reporter.stopped();
    Ok(())
}

/// `--root`, else the workspace root, else the current directory.
fn resolve_root(explicit: Option<&Path>, workspace: Option<&Path>) -> anyhow::Result<PathBuf> {
    let root = match explicit.or(workspace) {
        Some(root) => root.to_path_buf(),
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    root.canonicalize()
        .with_context(|| format!("cannot watch {}", root.display()))
}

/// Cancel `cancel` on SIGINT or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("[watch] cannot listen for ctrl+c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("[watch] cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => return,
    }

    crate::log_event!("watch", "shutdown requested");
    cancel.cancel();
}
