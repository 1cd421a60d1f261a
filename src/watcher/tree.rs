//! Directory registration.
//!
//! The platform watcher is non-recursive, so every directory under the root
//! is registered individually. Ignored directories are pruned during the
//! walk: nothing below them is visited or registered.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use notify::{RecursiveMode, Watcher};

use super::WatchError;
use crate::utils::has_ignored_segment;

/// Something that can start watching a single directory.
pub trait DirectoryRegistrar {
    fn register(&mut self, dir: &Path) -> Result<(), WatchError>;
}

/// Registers directories with a `notify` watcher, non-recursively.
pub struct NotifyRegistrar<W: Watcher> {
    watcher: W,
}

impl<W: Watcher> NotifyRegistrar<W> {
    pub fn new(watcher: W) -> Self {
        Self { watcher }
    }
}

impl<W: Watcher> DirectoryRegistrar for NotifyRegistrar<W> {
    fn register(&mut self, dir: &Path) -> Result<(), WatchError> {
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

/// Register `root` and every directory below it that is not ignored.
///
/// Ignore checks use the path relative to `root`, so a root that itself sits
/// inside e.g. `node_modules` is still watched. Failures on individual
/// subdirectories are logged and skipped; an unreadable root is fatal.
///
/// Returns the registered directories in walk order.
pub fn register_tree(
    root: &Path,
    ignore_dirs: &BTreeSet<String>,
    registrar: &mut dyn DirectoryRegistrar,
) -> Result<Vec<PathBuf>, WatchError> {
    std::fs::read_dir(root).map_err(|e| WatchError::WalkFailed {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })?;

    let prune_root = root.to_path_buf();
    let prune_dirs = ignore_dirs.clone();

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            if !entry.file_type().is_some_and(|ft| ft.is_dir()) {
                return false;
            }
            let relative = entry
                .path()
                .strip_prefix(&prune_root)
                .unwrap_or(entry.path());
            !has_ignored_segment(relative, &prune_dirs)
        })
        .build();

    let mut registered = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("[watch] skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_dir()) {
            continue;
        }

        let dir = entry.path();
        match registrar.register(dir) {
            Ok(()) => registered.push(dir.to_path_buf()),
            Err(e) if entry.depth() == 0 => return Err(e),
            Err(e) => tracing::warn!("[watch] {e}"),
        }
    }

    crate::debug_event!(
        "watch",
        "registered",
        "{} directories under {}",
        registered.len(),
        root.display()
    );
    Ok(registered)
}
