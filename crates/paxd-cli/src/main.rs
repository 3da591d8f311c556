mod completion;
mod config;
mod dispatch;
mod render;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::completion::CliCompletionShell;

#[derive(Parser, Debug)]
#[command(name = "paxd")]
#[command(version, about = "PaxD package manager", long_about = None)]
struct Cli {
    /// Install prefix; defaults to $PAXD_PREFIX, then the per-user location
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,
    /// Registry URL or directory, overriding config.toml
    #[arg(long, global = true)]
    registry: Option<String>,
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install a package and its dependencies
    Install {
        package: String,
        /// Install even when a file's sha256 does not match the manifest
        #[arg(long)]
        skip_checksum: bool,
        /// Print the install plan without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Update an installed package to the registry's version
    Update {
        package: String,
        /// Reinstall even when the registry version is not newer
        #[arg(long)]
        force: bool,
        #[arg(long)]
        skip_checksum: bool,
    },
    Uninstall {
        package: String,
    },
    List,
    Info {
        package: String,
    },
    /// Run a package from a temporary install that is removed afterwards
    Run {
        package: String,
        #[arg(long)]
        skip_checksum: bool,
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Print installed packages and their backend dependencies as JSON
    Export,
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
    Doctor,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = dispatch::run_cli(cli)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[cfg(test)]
mod tests;
