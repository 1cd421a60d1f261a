use anyhow::Context;
use clap::Parser;

use markwatch::cli::commands;
use markwatch::cli::{Cli, Commands};
use markwatch::config::Settings;
use markwatch::report::print_fatal;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        print_fatal(&e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings =
        Settings::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Watch(args) => commands::watch::run_watch(&args, settings).await,
        Commands::Config => commands::config::run_config(&settings),
    }
}
