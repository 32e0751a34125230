//! Worked-example corpus loaded from disk.
//!
//! Two inputs make up the corpus:
//! - a descriptions file, a JSON map of template name to `{description, subtasks}`;
//! - a transcripts directory with one file per template name. Blank lines
//!   separate subtask segments, `> ` lines are actions and every other line is
//!   the observation of the action before it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::catalog::{ActionSet, Catalog};
use crate::core::history::WorkedExample;
use crate::core::types::{Observation, Step, Subtask};

/// Which worked examples accompany an episode.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ExamplesLevel {
    /// Examples of the environment's own task family.
    #[default]
    Full,
    /// Always the `put` family.
    Basic,
    None,
}

/// Environment name prefix to task family.
pub const TASK_FAMILIES: &[(&str, &str)] = &[
    ("pick_and_place", "put"),
    ("pick_clean_then_place", "clean"),
    ("pick_heat_then_place", "heat"),
    ("pick_cool_then_place", "cool"),
    ("look_at_obj", "examine"),
    ("pick_two_obj", "puttwo"),
];

/// Task family for an environment name, if its prefix is known.
pub fn task_family(env_name: &str) -> Option<&'static str> {
    TASK_FAMILIES
        .iter()
        .find(|(prefix, _)| env_name.starts_with(prefix))
        .map(|(_, family)| *family)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleSelection {
    pub level: ExamplesLevel,
    pub key_prefix: String,
    pub per_task: usize,
}

#[derive(Debug, Deserialize)]
struct DescriptionEntry {
    description: String,
    subtasks: Vec<String>,
}

/// Immutable set of worked examples keyed by template name.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    examples: BTreeMap<String, WorkedExample>,
}

impl Corpus {
    pub fn new(examples: BTreeMap<String, WorkedExample>) -> Self {
        Self { examples }
    }

    /// Load the descriptions file and its transcripts.
    pub fn load(descriptions: &Path, transcripts_dir: &Path) -> Result<Self> {
        let raw = fs::read_to_string(descriptions)
            .with_context(|| format!("read {}", descriptions.display()))?;
        let entries: BTreeMap<String, DescriptionEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("parse {}", descriptions.display()))?;

        let catalog = Catalog::new(ActionSet {
            think: true,
            subtask_control: true,
        });
        let mut examples = BTreeMap::new();
        for (name, entry) in entries {
            let path = transcripts_dir.join(&name);
            let text = if path.exists() {
                Some(
                    fs::read_to_string(&path)
                        .with_context(|| format!("read transcript {}", path.display()))?,
                )
            } else {
                debug!(template = %name, "no transcript file, labels only");
                None
            };
            let subtasks = parse_transcript(&catalog, &entry.subtasks, text.as_deref())
                .with_context(|| format!("transcript {}", path.display()))?;
            examples.insert(name, WorkedExample::new(entry.description, subtasks));
        }
        info!(examples = examples.len(), "loaded corpus");
        Ok(Self { examples })
    }

    pub fn get(&self, name: &str) -> Option<&WorkedExample> {
        self.examples.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.examples.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Examples for an environment, highest-numbered key first.
    pub fn select(&self, env_name: &str, selection: &ExampleSelection) -> Result<Vec<WorkedExample>> {
        let family = match selection.level {
            ExamplesLevel::None => return Ok(Vec::new()),
            ExamplesLevel::Basic => "put",
            ExamplesLevel::Full => task_family(env_name)
                .ok_or_else(|| anyhow!("no task family for environment '{env_name}'"))?,
        };
        (0..selection.per_task)
            .rev()
            .map(|n| {
                let key = format!("{}{family}_{n}", selection.key_prefix);
                self.get(&key)
                    .cloned()
                    .ok_or_else(|| anyhow!("corpus has no example '{key}'"))
            })
            .collect()
    }
}

/// Split a transcript into the labelled subtasks of one example.
///
/// Missing text yields every label with no steps. Labels beyond the last
/// segment also stay empty.
pub fn parse_transcript(
    catalog: &Catalog,
    labels: &[String],
    text: Option<&str>,
) -> Result<Vec<Subtask>> {
    let mut subtasks: Vec<Subtask> = labels.iter().map(Subtask::new).collect();
    let Some(text) = text else {
        return Ok(subtasks);
    };

    let segments: Vec<&str> = text
        .trim_end()
        .split("\n\n")
        .filter(|segment| !segment.trim().is_empty())
        .collect();
    if segments.len() > labels.len() {
        bail!(
            "{} transcript segments but only {} subtask labels",
            segments.len(),
            labels.len()
        );
    }

    for (subtask, segment) in subtasks.iter_mut().zip(segments) {
        let mut last_action: Option<String> = None;
        for line in segment.lines().filter(|line| !line.trim().is_empty()) {
            if let Some(rendered) = line.strip_prefix("> ") {
                let action = catalog
                    .parse(rendered)
                    .with_context(|| format!("subtask '{}'", subtask.label))?;
                last_action = Some(action.name.clone());
                subtask.steps.push(Step::Action(action));
            } else {
                let action = last_action.clone().ok_or_else(|| {
                    anyhow!(
                        "observation before any action in subtask '{}': {line}",
                        subtask.label
                    )
                })?;
                subtask.steps.push(Step::Observation(Observation {
                    action,
                    text: line.to_string(),
                }));
            }
        }
    }
    Ok(subtasks)
}
