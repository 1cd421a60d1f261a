//! CLI argument parsing using clap.

use clap::{
    Args, Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::config::WatchSettings;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Watch a source tree and apply marker-comment edits
#[derive(Parser, Debug)]
#[command(
    name = "markwatch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch a source tree and apply marker-comment edits",
    long_about = "Watches a directory tree. When a saved file contains a marker comment \
                  such as `// @markwatch rename this`, the file is handed to the configured \
                  agent command, which performs the edit and removes the marker.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch for marker comments and dispatch edits
    #[command(about = "Watch a directory and act on marker comments")]
    Watch(WatchArgs),

    /// Display active settings
    #[command(about = "Display active settings as TOML")]
    Config,
}

/// Options of `markwatch watch`. Unset flags fall back to settings.toml.
#[derive(Args, Debug, Default, Clone)]
pub struct WatchArgs {
    /// Directory to watch (defaults to the workspace root, then the current directory)
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Directory names to skip; repeatable or comma-separated (replaces the configured list)
    #[arg(short, long, value_name = "DIR", value_delimiter = ',')]
    pub ignore: Vec<String>,

    /// Only files whose name matches this glob are processed (e.g. "*.rs")
    #[arg(short = 'p', long, value_name = "GLOB")]
    pub include: Option<String>,

    /// Output level: quiet, normal or verbose
    #[arg(short, long, value_name = "LEVEL")]
    pub verbosity: Option<String>,

    /// Quiet period in milliseconds before a changed file is processed; 0 disables debouncing
    #[arg(short, long, value_name = "MS", allow_negative_numbers = true)]
    pub debounce: Option<i64>,

    /// Use the lighter generation command
    #[arg(long)]
    pub use_weak_model: bool,

    /// Marker token to look for (default: @markwatch)
    #[arg(long, value_name = "TOKEN")]
    pub marker: Option<String>,
}

impl WatchArgs {
    /// Overlay command-line values onto loaded settings.
    pub fn apply(&self, settings: &mut WatchSettings) {
        if !self.ignore.is_empty() {
            settings.ignore_dirs = self.ignore.clone();
        }
        if let Some(include) = &self.include {
            settings.include = Some(include.clone());
        }
        if let Some(verbosity) = &self.verbosity {
            settings.verbosity = verbosity.clone();
        }
        if let Some(debounce) = self.debounce {
            settings.debounce_ms = debounce;
        }
        if self.use_weak_model {
            settings.use_weak_model = true;
        }
        if let Some(marker) = &self.marker {
            settings.marker = marker.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> WatchArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Watch(args) => args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_watch_flags() {
        let args = parse(&[
            "markwatch",
            "watch",
            "-i",
            "target,dist",
            "--ignore",
            "vendor",
            "-p",
            "*.rs",
            "-v",
            "verbose",
            "-d",
            "250",
            "--use-weak-model",
        ]);
        assert_eq!(args.ignore, vec!["target", "dist", "vendor"]);
        assert_eq!(args.include.as_deref(), Some("*.rs"));
        assert_eq!(args.verbosity.as_deref(), Some("verbose"));
        assert_eq!(args.debounce, Some(250));
        assert!(args.use_weak_model);
    }

    #[test]
    fn test_negative_debounce_parses_then_fails_validation() {
        let args = parse(&["markwatch", "watch", "--debounce", "-5"]);
        assert_eq!(args.debounce, Some(-5));

        let mut settings = WatchSettings::default();
        args.apply(&mut settings);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_apply_keeps_unset_values() {
        let mut settings = WatchSettings::default();
        WatchArgs::default().apply(&mut settings);
        assert_eq!(settings.ignore_dirs, vec![".git", "node_modules"]);
        assert_eq!(settings.debounce_ms, 500);

        let args = parse(&["markwatch", "watch", "-i", "build", "--marker", "@fixme"]);
        args.apply(&mut settings);
        assert_eq!(settings.ignore_dirs, vec!["build"]);
        assert_eq!(settings.marker, "@fixme");
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["markwatch", "config", "-c", "/tmp/settings.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/settings.toml")));
        assert!(matches!(cli.command, Commands::Config));
    }
}
