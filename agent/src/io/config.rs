//! Agent configuration stored as TOML (default `agent.toml`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::catalog::ActionSet;
use crate::core::history::DEFAULT_MARKER;
use crate::core::query::{ActionMode, QueryStyle};
use crate::episode::EpisodeOptions;
use crate::io::corpus::{ExampleSelection, ExamplesLevel};

pub const DEFAULT_CONFIG_PATH: &str = "agent.toml";

/// Agent configuration (TOML).
///
/// Intended to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub episode: EpisodeConfig,
    pub llm: LlmConfig,
    pub simulation: SimulationConfig,
    pub corpus: CorpusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EpisodeConfig {
    /// Split the task into subtasks before acting.
    pub use_subtasks: bool,
    pub action_mode: ActionMode,
    /// Offer the `think` action.
    pub include_think: bool,
    /// Offer `finish_subtask` and `replace_subtask`.
    pub include_subtask_control: bool,
    pub describe_actions_in_split: bool,
    pub max_steps: usize,
    /// Bullet marker expected on every split response line.
    pub subtask_marker: String,
    /// Number of most recent memory entries passed to an episode.
    pub memory_window: usize,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            use_subtasks: true,
            action_mode: ActionMode::Structured,
            include_think: true,
            include_subtask_control: false,
            describe_actions_in_split: false,
            max_steps: 50,
            subtask_marker: DEFAULT_MARKER.to_string(),
            memory_window: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Bridge command that answers one chat request per invocation.
    pub command: Vec<String>,
    pub max_attempts: u32,
    /// Sampling temperature grows by this much per failed attempt.
    pub temperature_step: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Truncate bridge stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm-bridge".to_string()],
            max_attempts: 6,
            temperature_step: 0.2,
            max_tokens: 100,
            timeout_secs: 120,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Long-lived bridge process speaking JSON lines.
    pub command: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            command: vec!["alfworld-bridge".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CorpusConfig {
    /// JSON map of template name to description and subtask labels.
    pub descriptions: PathBuf,
    /// One transcript file per template name.
    pub transcripts_dir: PathBuf,
    pub examples_level: ExamplesLevel,
    pub example_key_prefix: String,
    pub examples_per_task: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            descriptions: PathBuf::from("prompts/task_split_prompts.json"),
            transcripts_dir: PathBuf::from("prompts/subtask_prompts"),
            examples_level: ExamplesLevel::Full,
            example_key_prefix: "react_".to_string(),
            examples_per_task: 2,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.episode.max_steps == 0 {
            return Err(anyhow!("episode.max_steps must be > 0"));
        }
        if self.episode.subtask_marker.is_empty() {
            return Err(anyhow!("episode.subtask_marker must not be empty"));
        }
        if !command_is_set(&self.llm.command) {
            return Err(anyhow!("llm.command must be a non-empty array"));
        }
        if self.llm.max_attempts == 0 {
            return Err(anyhow!("llm.max_attempts must be > 0"));
        }
        if !self.llm.temperature_step.is_finite() || self.llm.temperature_step < 0.0 {
            return Err(anyhow!("llm.temperature_step must be a non-negative number"));
        }
        if self.llm.max_tokens == 0 {
            return Err(anyhow!("llm.max_tokens must be > 0"));
        }
        if self.llm.timeout_secs == 0 {
            return Err(anyhow!("llm.timeout_secs must be > 0"));
        }
        if self.llm.output_limit_bytes == 0 {
            return Err(anyhow!("llm.output_limit_bytes must be > 0"));
        }
        if !command_is_set(&self.simulation.command) {
            return Err(anyhow!("simulation.command must be a non-empty array"));
        }
        if self.corpus.examples_per_task == 0 {
            return Err(anyhow!("corpus.examples_per_task must be > 0"));
        }
        Ok(())
    }

    /// Episode controller options derived from `[episode]` and `[corpus]`.
    pub fn episode_options(&self) -> EpisodeOptions {
        let episode = &self.episode;
        EpisodeOptions {
            use_subtasks: episode.use_subtasks,
            action_set: ActionSet {
                think: episode.include_think,
                subtask_control: episode.include_subtask_control,
            },
            style: QueryStyle {
                action_mode: episode.action_mode,
                describe_actions_in_split: episode.describe_actions_in_split,
            },
            max_steps: episode.max_steps,
            subtask_marker: episode.subtask_marker.clone(),
            memory_window: episode.memory_window,
            examples: ExampleSelection {
                level: self.corpus.examples_level,
                key_prefix: self.corpus.example_key_prefix.clone(),
                per_task: self.corpus.examples_per_task,
            },
        }
    }
}

fn command_is_set(command: &[String]) -> bool {
    command.first().is_some_and(|program| !program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AgentConfig::default());
        assert_eq!(cfg.episode.max_steps, 50);
        assert_eq!(cfg.episode.memory_window, 3);
        assert_eq!(cfg.llm.max_attempts, 6);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("agent.toml");
        let mut cfg = AgentConfig::default();
        cfg.episode.action_mode = ActionMode::FreeText;
        cfg.corpus.examples_level = ExamplesLevel::Basic;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("agent.toml");
        fs::write(
            &path,
            "[episode]\nuse_subtasks = false\naction_mode = \"free_text\"\n\n[corpus]\nexamples_level = \"none\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert!(!cfg.episode.use_subtasks);
        assert_eq!(cfg.episode.action_mode, ActionMode::FreeText);
        assert_eq!(cfg.episode.max_steps, 50);
        assert_eq!(cfg.corpus.examples_level, ExamplesLevel::None);
        assert_eq!(cfg.llm, LlmConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("agent.toml");
        fs::write(&path, "[episode]\nmax_steps = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_steps"));

        let mut cfg = AgentConfig::default();
        cfg.llm.command.clear();
        assert!(write_config(&path, &cfg).is_err());

        let mut cfg = AgentConfig::default();
        cfg.llm.temperature_step = -0.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn episode_options_follow_config() {
        let mut cfg = AgentConfig::default();
        cfg.episode.include_subtask_control = true;
        cfg.episode.subtask_marker = "* ".to_string();
        let options = cfg.episode_options();
        assert!(options.action_set.think);
        assert!(options.action_set.subtask_control);
        assert_eq!(options.style.action_mode, ActionMode::Structured);
        assert_eq!(options.subtask_marker, "* ");
        assert_eq!(options.max_steps, 50);
        assert_eq!(options, EpisodeOptions {
            action_set: ActionSet {
                think: true,
                subtask_control: true,
            },
            subtask_marker: "* ".to_string(),
            ..EpisodeOptions::default()
        });
    }
}
