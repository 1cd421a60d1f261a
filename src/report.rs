//! Operator-facing output.
//!
//! Status lines go to stdout and honour the configured verbosity. Errors go
//! to stderr with a red `error:` prefix and always name the path involved.

use std::fmt::Display;
use std::path::Path;

use console::style;

use crate::config::Verbosity;
use crate::generation::{GenerationOutput, Usage};
use crate::watcher::ChangeEvent;

const RULE_WIDTH: usize = 31;

/// Renders pipeline progress for the operator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reporter {
    verbosity: Verbosity,
}

impl Reporter {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    fn normal(&self) -> bool {
        self.verbosity >= Verbosity::Normal
    }

    fn verbose(&self) -> bool {
        self.verbosity == Verbosity::Verbose
    }

    pub fn watching(&self, root: &Path, dir_count: usize) {
        if self.normal() {
            println!(
                "Watching {} ({dir_count} directories) for file changes... Press Ctrl+C to stop",
                style(root.display()).cyan()
            );
        }
    }

    pub fn change_detected(&self, event: &ChangeEvent) {
        if self.normal() {
            println!(
                "Change detected: {} ({})",
                event.path.display(),
                event.operation
            );
        }
    }

    pub fn skipped_binary(&self, path: &Path) {
        if self.verbose() {
            println!("Skipping binary file: {}", path.display());
        }
    }

    pub fn sending(&self, path: &Path, backend: &str, use_weak_model: bool) {
        if self.verbose() {
            let weight = if use_weak_model { "weak" } else { "default" };
            println!(
                "Sending {} to {backend} ({weight} model)...",
                path.display()
            );
        }
    }

    /// Result text is shown at every verbosity.
    pub fn result(&self, path: &Path, output: &GenerationOutput) {
        println!();
        println!(
            "{}",
            style(format!("===== Result for {} =====", path.display())).bold()
        );
        println!("{}", output.text);
        if !output.usage.is_empty() {
            println!("{}", style(format_usage(&output.usage)).cyan().bold());
        }
        println!("{}", "=".repeat(RULE_WIDTH));
    }

    pub fn error(&self, path: &Path, error: &dyn Display) {
        eprintln!(
            "{} {}: {error}",
            style("error:").red().bold(),
            path.display()
        );
    }

    pub fn stopped(&self) {
        if self.normal() {
            println!("Stopped watching.");
        }
    }
}

/// `[Usage Stats] Input tokens: .. | Output tokens: .. | Total: ..` plus cost when known.
pub fn format_usage(usage: &Usage) -> String {
    let mut line = format!(
        "[Usage Stats] Input tokens: {} | Output tokens: {} | Total: {}",
        usage.input_tokens,
        usage.output_tokens,
        usage.total_tokens()
    );
    if usage.cache_read_tokens > 0 || usage.cache_write_tokens > 0 {
        line.push_str(&format!(
            " | Cache read: {} | Cache write: {}",
            usage.cache_read_tokens, usage.cache_write_tokens
        ));
    }
    if let Some(cost) = usage.cost_usd {
        line.push_str(&format!(" | Cost: ${cost:.4}"));
    }
    line
}

/// Print a fatal startup error.
pub fn print_fatal(error: &anyhow::Error) {
    eprintln!("{} {error:#}", style("error:").red().bold());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_usage_plain() {
        let usage = Usage {
            input_tokens: 120,
            output_tokens: 30,
            ..Usage::default()
        };
        assert_eq!(
            format_usage(&usage),
            "[Usage Stats] Input tokens: 120 | Output tokens: 30 | Total: 150"
        );
    }

    #[test]
    fn test_format_usage_with_cache_and_cost() {
        let usage = Usage {
            input_tokens: 10,
            output_tokens: 5,
            cache_write_tokens: 2,
            cache_read_tokens: 100,
            cost_usd: Some(0.01234),
        };
        let line = format_usage(&usage);
        assert!(line.contains("Total: 117"));
        assert!(line.contains("Cache read: 100 | Cache write: 2"));
        assert!(line.ends_with("Cost: $0.0123"));
    }

    #[test]
    fn test_verbosity_gates() {
        assert!(!Reporter::new(Verbosity::Quiet).normal());
        assert!(Reporter::new(Verbosity::Normal).normal());
        assert!(!Reporter::new(Verbosity::Normal).verbose());
        assert!(Reporter::new(Verbosity::Verbose).verbose());
    }
}
