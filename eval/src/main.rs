mod cli;
mod env_config;
mod report;
mod trial;

use std::path::PathBuf;

use agent::io::config::DEFAULT_CONFIG_PATH;
use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::cli::RunArgs;

#[derive(Parser)]
#[command(name = "eval", version, about = "Trial runner for the household agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run trials over a batch of environments.
    Run {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Env configs from an earlier trial (`env_results_trial_N.json`).
        #[arg(long)]
        env_configs: Option<PathBuf>,
        /// Start from this many fresh env configs.
        #[arg(long, conflicts_with = "env_configs")]
        num_envs: Option<usize>,
        /// Defaults to `logs/eval-<timestamp>`.
        #[arg(long)]
        log_dir: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        start_trial: usize,
        #[arg(long, default_value_t = 1)]
        num_trials: usize,
        /// Do not pass reflections from earlier trials to episodes.
        #[arg(long)]
        no_memory: bool,
    },
    /// Summarize finished trials in a log directory.
    Report { log_dir: PathBuf },
}

fn main() -> Result<()> {
    agent::logging::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            env_configs,
            num_envs,
            log_dir,
            start_trial,
            num_trials,
            no_memory,
        } => cli::run_trials(&RunArgs {
            config,
            env_configs,
            num_envs,
            log_dir,
            start_trial,
            num_trials,
            use_memory: !no_memory,
        }),
        Command::Report { log_dir } => cli::report(&log_dir),
    }
}
