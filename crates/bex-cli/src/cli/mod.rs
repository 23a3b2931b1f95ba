//! CLI for the BEX backup execution engine.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use bex_core::config;
use std::path::PathBuf;

use commands::{run_check, run_jobs};

/// Top-level CLI for the BEX backup engine.
#[derive(Debug, Parser)]
#[command(name = "bex")]
#[command(about = "BEX: concurrent backup job execution engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Execute one or more backup jobs described by TOML job files.
    Run {
        /// Paths to job files.
        #[arg(required = true)]
        jobs: Vec<PathBuf>,

        /// Verify every copied file against its source checksum, even if
        /// the job file does not ask for it.
        #[arg(long)]
        verify: bool,
    },

    /// Dry-run preflight for a job file: scan sources and check the
    /// destination without copying anything.
    Check {
        /// Path to the job file.
        job: PathBuf,
    },

    /// Print the path of the active configuration file.
    ConfigPath,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Run { jobs, verify } => run_jobs(cfg, &jobs, verify).await?,
            CliCommand::Check { job } => run_check(&cfg, &job)?,
            CliCommand::ConfigPath => {
                println!("{}", config::config_path()?.display());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
