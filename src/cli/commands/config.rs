//! Config command.

use anyhow::Context;

use crate::config::Settings;

/// Print the effective settings (defaults, file and environment merged).
pub fn run_config(settings: &Settings) -> anyhow::Result<()> {
    let rendered = settings
        .to_toml()
        .context("failed to render settings as TOML")?;
    println!("{rendered}");
    Ok(())
}
