pub mod run;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "spendcat",
    version,
    about = "Classify procurement spend against a hierarchical taxonomy."
)]
pub struct Cli {
    /// Verbose diagnostics (debug-level logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify every transaction in the input file and write the output set.
    Run {
        /// Path to the client config YAML
        #[arg(long)]
        config: PathBuf,
        /// Override the input file (CSV or XLSX) from the config
        #[arg(long)]
        input: Option<PathBuf>,
        /// Override the output directory from the config
        #[arg(long = "output-dir")]
        output_dir: Option<PathBuf>,
        /// Split classification across this many parallel shards
        #[arg(long, default_value_t = 1)]
        shards: usize,
        /// Print the run summary as JSON instead of tables
        #[arg(long)]
        json: bool,
    },
    /// Check rule files against the taxonomy and mapping without classifying.
    Validate {
        /// Path to the client config YAML
        #[arg(long)]
        config: PathBuf,
    },
}
