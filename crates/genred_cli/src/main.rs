//! genred CLI — inspect and manage the compiled kernel cache.
//!
//! Provides `genred fingerprint` to name a formula's kernel, `genred build`
//! to compile it into the cache, `genred list` to show published kernels,
//! and `genred clean` to remove them.

#![warn(missing_docs)]

mod build;
mod clean;
mod formula;
mod list;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use genred_config::{ConfigError, ProcessConfig, CONFIG_FILE};

use crate::formula::FormulaArgs;

/// genred — compiled reduction kernel cache.
#[derive(Parser, Debug)]
#[command(name = "genred", version, about = "Compiled reduction kernel cache")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a `genred.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the fingerprint of a formula.
    Fingerprint(FormulaArgs),
    /// Compile a formula into the cache.
    Build(BuildArgs),
    /// List published kernels.
    List(ListArgs),
    /// Remove kernels from the cache.
    Clean(CleanArgs),
}

/// Arguments for the `genred build` subcommand.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// The formula to build.
    #[command(flatten)]
    pub formula: FormulaArgs,

    /// Rebuild even if the kernel is already published.
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for the `genred list` subcommand.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Arguments for the `genred clean` subcommand.
#[derive(Parser, Debug)]
pub struct CleanArgs {
    /// Fingerprints to remove. Removes every kernel if omitted.
    pub fingerprints: Vec<String>,
}

/// Output format of listings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable table.
    Text,
    /// Machine-readable JSON.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print debug information.
    pub verbose: bool,
    /// Optional path to a configuration file.
    pub config: Option<PathBuf>,
}

impl GlobalArgs {
    /// Resolves the process configuration.
    ///
    /// Reads `--config` if given, else `genred.toml` in the working
    /// directory if present, else the environment alone. `--verbose` forces
    /// verbose builds.
    pub fn process_config(&self) -> Result<ProcessConfig, ConfigError> {
        let local = Path::new(CONFIG_FILE);
        let config = match &self.config {
            Some(path) => genred_config::load_config(path)?,
            None if local.is_file() => genred_config::load_config(local)?,
            None => genred_config::from_env()?,
        };
        Ok(if self.verbose {
            config.with_verbose(true)
        } else {
            config
        })
    }
}

fn init_logging(global: &GlobalArgs) {
    let level = if global.quiet {
        tracing::Level::ERROR
    } else if global.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };
    init_logging(&global);

    let result = match cli.command {
        Command::Fingerprint(ref args) => formula::run(args),
        Command::Build(ref args) => build::run(args, &global),
        Command::List(ref args) => list::run(args, &global),
        Command::Clean(ref args) => clean::run(args, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
