//! CLI command implementations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, info};

use agent::episode::EpisodeController;
use agent::io::config::load_config;
use agent::io::corpus::Corpus;
use agent::io::llm::client_from_config;
use agent::io::simulation::{ProcessSimulation, Simulation};

use crate::env_config::{EnvConfig, fresh_configs, load_env_configs, results_path, write_env_configs};
use crate::report::aggregate;
use crate::trial::{TrialOptions, TrialPaths, run_trial};

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub config: PathBuf,
    pub env_configs: Option<PathBuf>,
    pub num_envs: Option<usize>,
    pub log_dir: Option<PathBuf>,
    pub start_trial: usize,
    pub num_trials: usize,
    pub use_memory: bool,
}

/// Default log directory: `logs/eval-<timestamp>`.
pub fn default_log_dir() -> PathBuf {
    PathBuf::from("logs").join(format!("eval-{}", Utc::now().format("%Y%m%d_%H%M%S")))
}

/// Run consecutive trials, persisting env configs after each one.
pub fn run_trials(args: &RunArgs) -> Result<()> {
    let cfg = load_config(&args.config)?;
    let corpus = Corpus::load(&cfg.corpus.descriptions, &cfg.corpus.transcripts_dir)
        .context("load corpus")?;
    debug!(examples = corpus.len(), "corpus loaded");
    let client = client_from_config(&cfg.llm);
    let controller = EpisodeController::new(&client, &corpus, cfg.episode_options());

    let mut configs = initial_configs(args)?;
    let log_dir = args.log_dir.clone().unwrap_or_else(default_log_dir);
    info!(
        log_dir = %log_dir.display(),
        envs = configs.len(),
        trials = args.num_trials,
        "starting trials"
    );

    for trial_idx in args.start_trial..args.start_trial + args.num_trials {
        let paths = TrialPaths::new(&log_dir, trial_idx);
        let mut sim = ProcessSimulation::spawn(&cfg.simulation.command)
            .context("start simulation")?;
        let summary = run_trial(
            &controller,
            &mut sim,
            &mut configs,
            &paths,
            TrialOptions {
                use_memory: args.use_memory,
            },
        )
        .with_context(|| format!("run trial {trial_idx}"))?;
        sim.close().context("close simulation")?;

        let results = results_path(&log_dir, trial_idx);
        write_env_configs(&results, &configs)?;
        println!(
            "trial: idx={} success={} additional={} total={} accuracy={:.2} log={}",
            trial_idx,
            summary.successes,
            summary.additional_successes,
            summary.total,
            summary.accuracy(),
            paths.trial_log.display()
        );
    }
    Ok(())
}

fn initial_configs(args: &RunArgs) -> Result<Vec<EnvConfig>> {
    match (&args.env_configs, args.num_envs) {
        (Some(path), _) => load_env_configs(path),
        (None, Some(count)) if count > 0 => Ok(fresh_configs(count)),
        (None, Some(_)) => bail!("--num-envs must be > 0"),
        (None, None) => bail!("pass --env-configs or --num-envs"),
    }
}

/// Print per-trial counts from the summary blocks in `log_dir`.
pub fn report(log_dir: &Path) -> Result<()> {
    let (records, warnings) = aggregate(log_dir)?;
    if records.is_empty() {
        println!("report: no finished trials in {}", log_dir.display());
    }
    for record in records {
        let summary = record.summary;
        println!(
            "report: trial={} success={} additional={} fail={} total={} accuracy={:.2}",
            record.trial_idx,
            summary.successes,
            summary.additional_successes,
            summary.failures(),
            summary.total,
            summary.accuracy()
        );
    }
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}
