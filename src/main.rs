mod audit;
mod categorizer;
mod cli;
mod error;
mod export;
mod extractor;
mod fmt;
mod importer;
mod models;
mod reports;
mod reviewer;
mod rules;
mod settings;
mod taxonomy;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            config,
            input,
            output_dir,
            shards,
            json,
        } => cli::run::run(&config, input, output_dir, shards, json),
        Commands::Validate { config } => cli::validate::run(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
