//! One trial: a single episode per environment config, logged to disk.
//!
//! Every environment of the batch is reset in order, so the simulation stays
//! aligned with the config list even when an environment is skipped. Success
//! and failure markers in the log directory let an interrupted trial resume
//! without rerunning finished environments.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{error, info, instrument, warn};

use agent::core::error::ContractError;
use agent::core::observation::{environment_name, simple_name, task_intro};
use agent::episode::{EpisodeController, EpisodeTask};
use agent::io::corpus::{ExamplesLevel, task_family};
use agent::io::llm::LlmClient;
use agent::io::simulation::Simulation;

use crate::env_config::EnvConfig;

/// Log locations for one trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialPaths {
    pub log_dir: PathBuf,
    pub trial_log: PathBuf,
    pub world_log: PathBuf,
    pub trial_idx: usize,
}

impl TrialPaths {
    pub fn new(log_dir: &Path, trial_idx: usize) -> Self {
        Self {
            log_dir: log_dir.to_path_buf(),
            trial_log: log_dir.join(format!("trial_{trial_idx}.log")),
            world_log: log_dir.join("world.log"),
            trial_idx,
        }
    }

    pub fn success_marker(&self, simple_name: &str) -> PathBuf {
        self.log_dir
            .join(format!("{}_{simple_name}_succ.txt", self.trial_idx))
    }

    pub fn failure_marker(&self, simple_name: &str) -> PathBuf {
        self.log_dir
            .join(format!("{}_{simple_name}_fail.txt", self.trial_idx))
    }
}

/// Counts for one trial.
///
/// `additional_successes` are the ones earned in this trial, as opposed to
/// environments already solved in an earlier trial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrialSummary {
    pub successes: usize,
    pub additional_successes: usize,
    pub total: usize,
}

impl TrialSummary {
    pub fn failures(&self) -> usize {
        self.total.saturating_sub(self.successes)
    }

    /// Success rate rounded to two decimals; `0.0` for an empty batch.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let rate = self.successes as f64 / self.total as f64;
        (rate * 100.0).round() / 100.0
    }
}

/// The summary block appended to trial and world logs.
impl fmt::Display for TrialSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\n-----\nSUCCESS: {}\nADDITIONAL SUCCESS: {}\nFAIL: {}\nTOTAL: {}\nACCURACY: {:.2}\n-----",
            self.successes,
            self.additional_successes,
            self.failures(),
            self.total,
            self.accuracy()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialOptions {
    /// Pass each config's memory to its episode.
    pub use_memory: bool,
}

impl Default for TrialOptions {
    fn default() -> Self {
        Self { use_memory: true }
    }
}

#[derive(Debug, Clone, Copy)]
enum EnvStatus {
    Success,
    Failure,
}

/// Run one trial over `env_configs`, updating `is_success` in place.
///
/// Contract errors fail their environment and the batch moves on. Simulation
/// and log I/O errors abort the trial.
#[instrument(skip_all, fields(trial = paths.trial_idx, envs = env_configs.len()))]
pub fn run_trial<L: LlmClient>(
    controller: &EpisodeController<'_, L>,
    sim: &mut dyn Simulation,
    env_configs: &mut [EnvConfig],
    paths: &TrialPaths,
    options: TrialOptions,
) -> Result<TrialSummary> {
    fs::create_dir_all(&paths.log_dir)
        .with_context(|| format!("create {}", paths.log_dir.display()))?;
    let trial_idx = paths.trial_idx;
    let mut summary = TrialSummary {
        total: env_configs.len(),
        ..TrialSummary::default()
    };

    for (z, config) in env_configs.iter_mut().enumerate() {
        let reset = sim
            .reset()
            .with_context(|| format!("reset environment #{z}"))?;
        let name = environment_name(&reset.gamefile);
        let simple = simple_name(&name);
        let success_marker = paths.success_marker(&simple);
        let failure_marker = paths.failure_marker(&simple);
        info!(z, env = %name, "environment loaded");

        if success_marker.exists() || config.is_success {
            summary.successes += 1;
            if success_marker.exists() {
                summary.additional_successes += 1;
            }
            append(&paths.world_log, &world_line(z, trial_idx, EnvStatus::Success))?;
            append(&paths.trial_log, &format!("\n#####\n\nEnvironment #{z}: Success\n\n#####\n"))?;
            continue;
        }
        if failure_marker.exists() {
            append(&paths.world_log, &world_line(z, trial_idx, EnvStatus::Failure))?;
            append(&paths.trial_log, &format!("\n#####\n\nEnvironment #{z}: Fail\n\n#####\n"))?;
            continue;
        }

        let (status, transcript) = if controller.options().examples.level == ExamplesLevel::Full
            && task_family(&name).is_none()
        {
            warn!(env = %name, "no task family for environment");
            (EnvStatus::Failure, format!("no worked examples for environment '{name}'"))
        } else {
            let task = EpisodeTask {
                env_name: name.clone(),
                description: task_intro(&reset.observation),
                memory: if options.use_memory {
                    config.memory.clone()
                } else {
                    Vec::new()
                },
            };
            match controller.run(sim, &task) {
                Ok(report) => {
                    info!(env = %name, outcome = report.outcome.as_str(), steps = report.steps, "episode done");
                    let status = if report.outcome.is_success() {
                        EnvStatus::Success
                    } else {
                        EnvStatus::Failure
                    };
                    (status, report.state.to_string())
                }
                Err(err) => match err.downcast_ref::<ContractError>() {
                    Some(contract) => {
                        error!(env = %name, error = %contract, "episode aborted");
                        (EnvStatus::Failure, format!("ERROR: {contract}"))
                    }
                    None => {
                        return Err(err).with_context(|| format!("environment #{z} ({name})"));
                    }
                },
            }
        };

        match status {
            EnvStatus::Success => {
                config.is_success = true;
                summary.successes += 1;
                summary.additional_successes += 1;
                touch(&success_marker)?;
            }
            EnvStatus::Failure => touch(&failure_marker)?,
        }
        let label = match status {
            EnvStatus::Success => "OK",
            EnvStatus::Failure => "FAIL",
        };
        append(&paths.world_log, &world_line(z, trial_idx, status))?;
        append(
            &paths.trial_log,
            &format!("\n#####\n\nEnvironment #{z}:\n{transcript}\n\nSTATUS: {label}\n\n#####\n"),
        )?;
    }

    append(&paths.trial_log, &summary.to_string())?;
    append(&paths.world_log, &format!("{summary}\n"))?;
    info!(
        successes = summary.successes,
        total = summary.total,
        "trial finished"
    );
    Ok(summary)
}

fn world_line(z: usize, trial_idx: usize, status: EnvStatus) -> String {
    let status = match status {
        EnvStatus::Success => "SUCCESS",
        EnvStatus::Failure => "FAIL",
    };
    format!("Environment #{z} Trial #{trial_idx}: {status}\n")
}

fn append(path: &Path, text: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(text.as_bytes())
        .with_context(|| format!("append to {}", path.display()))
}

fn touch(path: &Path) -> Result<()> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("create marker {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent::episode::EpisodeOptions;
    use agent::test_support::{ScriptedLlm, ScriptedSimulation, sample_corpus};
    use serde_json::json;
    use tempfile::tempdir;

    use crate::env_config::fresh_configs;

    const BANNER: &str = "-= Welcome to TextWorld, ALFRED! =-\n\nYou are in the middle of a room.\n\nYour task is to: put some mug on shelf.";

    fn gamefile(trial: &str) -> String {
        format!("/data/valid_unseen/pick_and_place_simple-Mug-None-Shelf-1/{trial}/game.tw-pddl")
    }

    fn simple(trial: &str) -> String {
        format!("pick_and_place_simple-Mug-None-Shelf-1_{trial}")
    }

    #[test]
    fn summary_block_matches_log_format() {
        let summary = TrialSummary {
            successes: 2,
            additional_successes: 1,
            total: 3,
        };
        assert_eq!(summary.failures(), 1);
        assert_eq!(summary.accuracy(), 0.67);
        assert_eq!(
            summary.to_string(),
            "\n-----\nSUCCESS: 2\nADDITIONAL SUCCESS: 1\nFAIL: 1\nTOTAL: 3\nACCURACY: 0.67\n-----"
        );
        assert_eq!(TrialSummary::default().accuracy(), 0.0);
    }

    #[test]
    fn markers_are_keyed_by_trial_and_name() {
        let paths = TrialPaths::new(Path::new("/tmp/logs"), 2);
        assert_eq!(paths.trial_log, PathBuf::from("/tmp/logs/trial_2.log"));
        assert_eq!(paths.world_log, PathBuf::from("/tmp/logs/world.log"));
        assert_eq!(
            paths.success_marker("a_b"),
            PathBuf::from("/tmp/logs/2_a_b_succ.txt")
        );
        assert_eq!(
            paths.failure_marker("a_b"),
            PathBuf::from("/tmp/logs/2_a_b_fail.txt")
        );
    }

    /// Env 0 was solved earlier, env 1 is solved now, env 2 exhausts.
    #[test]
    fn trial_counts_logs_and_marks_each_environment() {
        let temp = tempdir().expect("tempdir");
        let paths = TrialPaths::new(temp.path(), 0);
        let llm = ScriptedLlm::new()
            .text("- find mug\n- put mug on shelf")
            .text("Yes.")
            .call("goto", json!({ "recep": "countertop", "recep_idx": 1 }))
            .call("put", json!({ "object": "mug", "object_idx": 1, "recep": "shelf", "recep_idx": 1 }))
            .text("- find mug\n- put mug on shelf")
            .text("No.")
            .call("goto", json!({ "recep": "cabinet", "recep_idx": 1 }))
            .call("goto", json!({ "recep": "cabinet", "recep_idx": 1 }));
        let mut sim = ScriptedSimulation::new()
            .reset_to(BANNER, &gamefile("trial_T1"))
            .reset_to(BANNER, &gamefile("trial_T2"))
            .reset_to(BANNER, &gamefile("trial_T3"))
            .observe("You arrive at loc 3. On the countertop 1, you see a mug 1.")
            .finish("You put the mug 1 in/on the shelf 1.", true);
        let corpus = sample_corpus();
        let controller = EpisodeController::new(&llm, &corpus, EpisodeOptions::default());
        let mut configs = fresh_configs(3);
        configs[0].is_success = true;

        let summary = run_trial(&controller, &mut sim, &mut configs, &paths, TrialOptions::default())
            .expect("trial");

        assert_eq!(
            summary,
            TrialSummary {
                successes: 2,
                additional_successes: 1,
                total: 3,
            }
        );
        assert_eq!(sim.reset_count, 3);
        assert!(configs[1].is_success);
        assert!(!configs[2].is_success);
        assert!(paths.success_marker(&simple("trial_T2")).exists());
        assert!(paths.failure_marker(&simple("trial_T3")).exists());
        assert!(!paths.success_marker(&simple("trial_T1")).exists());

        let world = fs::read_to_string(&paths.world_log).expect("world log");
        assert!(world.starts_with(
            "Environment #0 Trial #0: SUCCESS\nEnvironment #1 Trial #0: SUCCESS\nEnvironment #2 Trial #0: FAIL\n\n-----\nSUCCESS: 2\n"
        ));
        assert!(world.ends_with("ACCURACY: 0.67\n-----\n"));

        let trial = fs::read_to_string(&paths.trial_log).expect("trial log");
        assert!(trial.starts_with("\n#####\n\nEnvironment #0: Success\n\n#####\n"));
        assert!(trial.contains("Environment #1:\nYou are in the middle of a room.\nYour task is to: put some mug on shelf.\n*** SUBTASK: find mug ***\n> go to countertop 1\n"));
        assert!(trial.contains("STATUS: OK"));
        assert!(trial.contains("STATUS: FAIL"));
        assert!(trial.ends_with("TOTAL: 3\nACCURACY: 0.67\n-----"));
    }

    #[test]
    fn existing_markers_skip_environments_on_resume() {
        let temp = tempdir().expect("tempdir");
        let paths = TrialPaths::new(temp.path(), 1);
        touch(&paths.failure_marker(&simple("trial_T1"))).expect("marker");
        touch(&paths.success_marker(&simple("trial_T2"))).expect("marker");
        let llm = ScriptedLlm::new();
        let mut sim = ScriptedSimulation::new()
            .reset_to(BANNER, &gamefile("trial_T1"))
            .reset_to(BANNER, &gamefile("trial_T2"));
        let corpus = sample_corpus();
        let controller = EpisodeController::new(&llm, &corpus, EpisodeOptions::default());
        let mut configs = fresh_configs(2);

        let summary = run_trial(&controller, &mut sim, &mut configs, &paths, TrialOptions::default())
            .expect("trial");

        assert_eq!(summary.successes, 1);
        assert_eq!(summary.additional_successes, 1);
        assert!(llm.text_queries.borrow().is_empty());
        assert!(llm.action_queries.borrow().is_empty());
        let trial = fs::read_to_string(&paths.trial_log).expect("trial log");
        assert!(trial.contains("Environment #0: Fail"));
        assert!(trial.contains("Environment #1: Success"));
    }

    #[test]
    fn contract_errors_fail_the_environment_and_the_batch_continues() {
        let temp = tempdir().expect("tempdir");
        let paths = TrialPaths::new(temp.path(), 0);
        let llm = ScriptedLlm::new()
            .text("find the mug, then put it away")
            .text("- put mug on shelf")
            .call("put", json!({ "object": "mug", "object_idx": 1, "recep": "shelf", "recep_idx": 1 }));
        let mut sim = ScriptedSimulation::new()
            .reset_to(BANNER, &gamefile("trial_T1"))
            .reset_to(BANNER, &gamefile("trial_T2"))
            .finish("You put the mug 1 in/on the shelf 1.", true);
        let corpus = sample_corpus();
        let controller = EpisodeController::new(&llm, &corpus, EpisodeOptions::default());
        let mut configs = fresh_configs(2);

        let summary = run_trial(&controller, &mut sim, &mut configs, &paths, TrialOptions::default())
            .expect("trial");

        assert_eq!(summary.successes, 1);
        assert!(paths.failure_marker(&simple("trial_T1")).exists());
        let trial = fs::read_to_string(&paths.trial_log).expect("trial log");
        assert!(trial.contains("Environment #0:\nERROR: malformed subtask list"));
        assert!(trial.contains("STATUS: OK"));
    }

    #[test]
    fn unknown_task_family_fails_without_querying() {
        let temp = tempdir().expect("tempdir");
        let paths = TrialPaths::new(temp.path(), 0);
        let llm = ScriptedLlm::new();
        let mut sim = ScriptedSimulation::new()
            .reset_to(BANNER, "/data/valid_unseen/stack_blocks-Cube-1/trial_T9/game.tw-pddl");
        let corpus = sample_corpus();
        let controller = EpisodeController::new(&llm, &corpus, EpisodeOptions::default());
        let mut configs = fresh_configs(1);

        let summary = run_trial(&controller, &mut sim, &mut configs, &paths, TrialOptions::default())
            .expect("trial");

        assert_eq!(summary.successes, 0);
        assert!(llm.text_queries.borrow().is_empty());
        assert!(paths.failure_marker("stack_blocks-Cube-1_trial_T9").exists());
    }

    #[test]
    fn memory_is_withheld_when_disabled() {
        let temp = tempdir().expect("tempdir");
        let paths = TrialPaths::new(temp.path(), 0);
        let llm = ScriptedLlm::new().no_call();
        let mut sim = ScriptedSimulation::new().reset_to(BANNER, &gamefile("trial_T1"));
        let corpus = sample_corpus();
        let options = EpisodeOptions {
            use_subtasks: false,
            ..EpisodeOptions::default()
        };
        let controller = EpisodeController::new(&llm, &corpus, options);
        let mut configs = fresh_configs(1);
        configs[0].memory.push("Look on the countertop.".to_string());

        run_trial(&controller, &mut sim, &mut configs, &paths, TrialOptions { use_memory: false })
            .expect("trial");

        let queries = llm.action_queries.borrow();
        let live = queries[0].last().expect("live turn").content_str();
        assert!(live.starts_with("You are in the middle of a room."));
        assert!(!live.contains("Your memory"));
        assert_eq!(configs[0].memory.len(), 1);
        let trial = fs::read_to_string(&paths.trial_log).expect("trial log");
        assert!(trial.contains("STATUS: FAIL"));
    }
}
