//! Common utilities shared across modules.

use std::collections::BTreeSet;
use std::path::{Component, Path};

/// Number of leading bytes inspected by the binary sniff.
pub const SNIFF_LEN: usize = 512;

/// Heuristic binary check: a NUL byte within the first [`SNIFF_LEN`] bytes.
pub fn is_binary_content(content: &[u8]) -> bool {
    content.iter().take(SNIFF_LEN).any(|&b| b == 0)
}

/// Whether any normal component of `path` equals one of `ignore_dirs`.
///
/// Matches whole segments only: `node_modules` ignores `a/node_modules/b`
/// but not `a/node_modules_old/b`.
pub fn has_ignored_segment(path: &Path, ignore_dirs: &BTreeSet<String>) -> bool {
    if ignore_dirs.is_empty() {
        return false;
    }
    path.components().any(|component| match component {
        Component::Normal(segment) => segment
            .to_str()
            .is_some_and(|segment| ignore_dirs.contains(segment)),
        _ => false,
    })
}
