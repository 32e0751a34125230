//! Per-environment state carried between trials, persisted as JSON.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One entry of the env-config list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvConfig {
    pub name: String,
    /// Reflections from earlier trials, oldest first.
    #[serde(default)]
    pub memory: Vec<String>,
    #[serde(default)]
    pub is_success: bool,
    /// Reserved for reflection tooling; passed through untouched.
    #[serde(default)]
    pub skip: bool,
}

impl EnvConfig {
    pub fn fresh(index: usize) -> Self {
        Self {
            name: format!("env_{index}"),
            memory: Vec::new(),
            is_success: false,
            skip: false,
        }
    }
}

/// `count` configs with no memory and no successes.
pub fn fresh_configs(count: usize) -> Vec<EnvConfig> {
    (0..count).map(EnvConfig::fresh).collect()
}

/// Path of the env configs written after trial `trial_idx`.
pub fn results_path(log_dir: &Path, trial_idx: usize) -> PathBuf {
    log_dir.join(format!("env_results_trial_{trial_idx}.json"))
}

pub fn load_env_configs(path: &Path) -> Result<Vec<EnvConfig>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Atomically write env configs as pretty JSON.
pub fn write_env_configs(path: &Path, configs: &[EnvConfig]) -> Result<()> {
    let contents = serde_json::to_string_pretty(configs).context("serialize env configs")?;
    agent::io::write_atomic(path, &format!("{contents}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_configs_are_named_by_index() {
        let configs = fresh_configs(3);
        assert_eq!(configs.len(), 3);
        assert_eq!(configs[2].name, "env_2");
        assert!(configs.iter().all(|c| !c.is_success && c.memory.is_empty()));
    }

    #[test]
    fn write_then_load_keeps_entries() {
        let temp = tempdir().expect("tempdir");
        let path = results_path(temp.path(), 4);
        assert!(path.ends_with("env_results_trial_4.json"));

        let mut configs = fresh_configs(2);
        configs[1].is_success = true;
        configs[1].memory.push("Check the drawers first.".to_string());
        write_env_configs(&path, &configs).expect("write");
        assert_eq!(load_env_configs(&path).expect("load"), configs);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("envs.json");
        fs::write(&path, r#"[{"name": "env_0"}, {"name": "env_1", "is_success": true}]"#)
            .expect("write");
        let configs = load_env_configs(&path).expect("load");
        assert_eq!(configs[0], EnvConfig::fresh(0));
        assert!(configs[1].is_success);
        assert!(!configs[1].skip);
    }

    #[test]
    fn load_reports_path_on_bad_json() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("envs.json");
        fs::write(&path, "{not json").expect("write");
        let err = load_env_configs(&path).unwrap_err();
        assert!(format!("{err:#}").contains("envs.json"));
    }
}
