//! Subtask-partitioned action/observation history.
//!
//! [`EpisodeState`] is the live, mutable store driven by the episode
//! controller. [`WorkedExample`] is a frozen transcript used only as few-shot
//! context. Both expose the read-only [`Transcript`] view that query
//! construction consumes, so examples can never be mutated through it.

use std::fmt;

use crate::core::catalog::{ActionSet, Catalog};
use crate::core::error::ContractError;
use crate::core::types::{Action, Args, Observation, Step, Subtask};

/// Acknowledgment observed by introspective actions. Excluded from summaries.
pub const ACKNOWLEDGMENT: &str = "OK.";

/// Label of the single subtask used when decomposition is disabled.
pub const CATCH_ALL_LABEL: &str = "N/A";

/// Default bullet marker for model-produced subtask lists.
pub const DEFAULT_MARKER: &str = "- ";

/// Read-only access shared by live episodes and worked examples.
pub trait Transcript {
    fn task_description(&self) -> &str;

    fn subtasks(&self) -> &[Subtask];

    /// Non-acknowledgment observation texts of subtask `index`, in recorded order.
    fn observations_for(&self, index: usize) -> Vec<&str> {
        let Some(subtask) = self.subtasks().get(index) else {
            return Vec::new();
        };
        subtask
            .steps
            .iter()
            .filter_map(|step| match step {
                Step::Observation(obs) if obs.text != ACKNOWLEDGMENT => Some(obs.text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn subtask(&self, index: usize) -> Result<&Subtask, ContractError> {
        self.subtasks()
            .get(index)
            .ok_or(ContractError::EmptyHistory { index })
    }
}

/// Immutable, completed transcript used as few-shot context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkedExample {
    task_description: String,
    subtasks: Vec<Subtask>,
}

impl WorkedExample {
    pub fn new(task_description: impl Into<String>, subtasks: Vec<Subtask>) -> Self {
        Self {
            task_description: task_description.into(),
            subtasks,
        }
    }
}

impl Transcript for WorkedExample {
    fn task_description(&self) -> &str {
        &self.task_description
    }

    fn subtasks(&self) -> &[Subtask] {
        &self.subtasks
    }
}

/// Live episode history with controlled mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeState {
    task_description: String,
    memory: Vec<String>,
    subtasks: Vec<Subtask>,
    current: usize,
    last_action: Option<Action>,
    exhausted: bool,
}

impl EpisodeState {
    pub fn new(task_description: impl Into<String>, memory: Vec<String>) -> Self {
        Self {
            task_description: task_description.into(),
            memory,
            subtasks: Vec::new(),
            current: 0,
            last_action: None,
            exhausted: false,
        }
    }

    /// Opaque reflections carried over from earlier trials.
    pub fn memory(&self) -> &[String] {
        &self.memory
    }

    /// Clear history, index, exhaustion and last action.
    pub fn reset(&mut self) {
        self.subtasks.clear();
        self.current = 0;
        self.last_action = None;
        self.exhausted = false;
    }

    /// Replace the subtask list with the labels of a bulleted list.
    ///
    /// Blank lines are skipped; every other line must start with `marker`.
    pub fn set_subtasks(&mut self, raw: &str, marker: &str) -> Result<(), ContractError> {
        let mut subtasks = Vec::new();
        for line in raw.lines().map(str::trim_end) {
            if line.trim().is_empty() {
                continue;
            }
            let label = line
                .strip_prefix(marker)
                .ok_or_else(|| ContractError::MalformedSubtaskList {
                    reason: format!("line '{line}' does not start with '{marker}'"),
                })?;
            subtasks.push(Subtask::new(label.trim()));
        }
        if subtasks.is_empty() {
            return Err(ContractError::MalformedSubtaskList {
                reason: "no subtasks listed".to_string(),
            });
        }
        self.subtasks = subtasks;
        self.current = 0;
        Ok(())
    }

    /// Install the single catch-all subtask.
    pub fn use_catch_all(&mut self) {
        self.subtasks = vec![Subtask::new(CATCH_ALL_LABEL)];
        self.current = 0;
    }

    pub fn record_action(&mut self, name: &str, args: Args) -> Result<(), ContractError> {
        let action = Action::new(name, args);
        if self.last_action.as_ref() == Some(&action) {
            self.exhausted = true;
        }
        self.current_mut()?.steps.push(Step::Action(action.clone()));
        self.last_action = Some(action);
        Ok(())
    }

    pub fn record_observation(&mut self, action: &str, text: &str) -> Result<(), ContractError> {
        self.current_mut()?
            .steps
            .push(Step::Observation(Observation {
                action: action.to_string(),
                text: text.to_string(),
            }));
        Ok(())
    }

    /// Move to the next subtask; a no-op on the last one.
    ///
    /// Exhaustion only compares actions within one subtask, so the remembered
    /// action is cleared when the index moves.
    pub fn advance_subtask(&mut self) {
        if self.current + 1 < self.subtasks.len() {
            self.current += 1;
            self.last_action = None;
        }
    }

    /// Relabel the current subtask, keeping its steps.
    pub fn replace_current_subtask(&mut self, label: &str) -> Result<(), ContractError> {
        self.current_mut()?.label = label.trim().to_string();
        Ok(())
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_label(&self) -> Option<&str> {
        self.subtasks
            .get(self.current)
            .map(|subtask| subtask.label.as_str())
    }

    pub fn is_last_subtask(&self) -> bool {
        self.current + 1 >= self.subtasks.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Total recorded actions across all subtasks.
    pub fn action_count(&self) -> usize {
        self.subtasks
            .iter()
            .flat_map(|subtask| &subtask.steps)
            .filter(|step| matches!(step, Step::Action(_)))
            .count()
    }

    /// Freeze this history into a worked example for later few-shot use.
    pub fn to_example(&self) -> WorkedExample {
        WorkedExample::new(self.task_description.clone(), self.subtasks.clone())
    }

    fn current_mut(&mut self) -> Result<&mut Subtask, ContractError> {
        let index = self.current;
        self.subtasks
            .get_mut(index)
            .ok_or(ContractError::EmptyHistory { index })
    }
}

impl Transcript for EpisodeState {
    fn task_description(&self) -> &str {
        &self.task_description
    }

    fn subtasks(&self) -> &[Subtask] {
        &self.subtasks
    }
}

/// Human-readable transcript for trial logs.
///
/// Actions are rendered against the full catalog. Anything it cannot render
/// falls back to `name(key=value, ...)`.
impl fmt::Display for EpisodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let catalog = Catalog::new(ActionSet {
            think: true,
            subtask_control: true,
        });
        writeln!(f, "{}", self.task_description)?;
        for subtask in &self.subtasks {
            writeln!(f, "*** SUBTASK: {} ***", subtask.label)?;
            for step in &subtask.steps {
                match step {
                    Step::Action(action) => match catalog.render_action(action) {
                        Ok(rendered) => writeln!(f, "> {rendered}")?,
                        Err(_) => {
                            let args: Vec<String> = action
                                .args
                                .iter()
                                .map(|(key, value)| format!("{key}={value}"))
                                .collect();
                            writeln!(f, "> {}({})", action.name, args.join(", "))?;
                        }
                    },
                    Step::Observation(obs) => writeln!(f, "{}", obs.text)?,
                }
            }
        }
        Ok(())
    }
}
