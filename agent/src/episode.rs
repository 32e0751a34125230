//! Orchestration for a single episode: split, act, check, advance.
//!
//! The controller runs one task attempt against an already-reset simulation
//! and returns a terminal verdict together with the final history.
//!
//! ```text
//! SPLITTING -> RUNNING -> SUCCEEDED | EXHAUSTED | TIMED_OUT
//!                      -> BACKEND_FAILED | ENDED_WITHOUT_SUCCESS
//! ```

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::catalog::{ActionSet, Catalog, FINISH_SUBTASK, REPLACE_SUBTASK};
use crate::core::error::ContractError;
use crate::core::history::{ACKNOWLEDGMENT, DEFAULT_MARKER, EpisodeState, Transcript, WorkedExample};
use crate::core::observation::clean_observation;
use crate::core::query::{ActionMode, QueryBuilder, QueryStyle};
use crate::core::types::{Action, EpisodeOutcome, Message};
use crate::io::corpus::{Corpus, ExampleSelection, ExamplesLevel};
use crate::io::llm::LlmClient;
use crate::io::simulation::Simulation;

/// Knobs for one controller. See `[episode]` in the agent config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeOptions {
    pub use_subtasks: bool,
    pub action_set: ActionSet,
    pub style: QueryStyle,
    pub max_steps: usize,
    pub subtask_marker: String,
    pub memory_window: usize,
    pub examples: ExampleSelection,
}

impl Default for EpisodeOptions {
    fn default() -> Self {
        Self {
            use_subtasks: true,
            action_set: ActionSet {
                think: true,
                subtask_control: false,
            },
            style: QueryStyle {
                action_mode: ActionMode::Structured,
                describe_actions_in_split: false,
            },
            max_steps: 50,
            subtask_marker: DEFAULT_MARKER.to_string(),
            memory_window: 3,
            examples: ExampleSelection {
                level: ExamplesLevel::Full,
                key_prefix: "react_".to_string(),
                per_task: 2,
            },
        }
    }
}

/// One task attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeTask {
    /// Environment name, used to pick worked examples.
    pub env_name: String,
    /// Task description (reset observation without its banner).
    pub description: String,
    /// Reflections from earlier trials, oldest first.
    pub memory: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EpisodeReport {
    pub outcome: EpisodeOutcome,
    /// Actions taken, introspective ones included.
    pub steps: usize,
    pub state: EpisodeState,
}

pub struct EpisodeController<'a, L> {
    llm: &'a L,
    corpus: &'a Corpus,
    catalog: Catalog,
    options: EpisodeOptions,
}

impl<'a, L: LlmClient> EpisodeController<'a, L> {
    pub fn new(llm: &'a L, corpus: &'a Corpus, options: EpisodeOptions) -> Self {
        Self {
            llm,
            corpus,
            catalog: Catalog::new(options.action_set),
            options,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn options(&self) -> &EpisodeOptions {
        &self.options
    }

    /// Run one episode to a terminal verdict.
    ///
    /// Contract errors (bad split, unparseable or invalid actions) are
    /// returned as errors; callers recover them with
    /// `downcast_ref::<ContractError>()`.
    #[instrument(skip_all, fields(env = %task.env_name, subtasks = self.options.use_subtasks))]
    pub fn run(&self, sim: &mut dyn Simulation, task: &EpisodeTask) -> Result<EpisodeReport> {
        let examples = self
            .corpus
            .select(&task.env_name, &self.options.examples)
            .context("select worked examples")?;
        let keep_from = task.memory.len().saturating_sub(self.options.memory_window);
        let mut state = EpisodeState::new(&task.description, task.memory[keep_from..].to_vec());
        state.reset();
        let queries = QueryBuilder::new(&self.catalog, self.options.style);

        if self.options.use_subtasks {
            let Some(split) = self.llm.complete(&queries.split_query(&state, &examples), &[]) else {
                warn!("no split response");
                return Ok(finish(EpisodeOutcome::BackendFailed, 0, state));
            };
            state.set_subtasks(split.trim(), &self.options.subtask_marker)?;
            info!(
                subtasks = state.subtasks().len(),
                first = state.current_label().unwrap_or_default(),
                "task split"
            );
        } else {
            state.use_catch_all();
        }

        for step in 0..self.options.max_steps {
            let query = if self.options.use_subtasks {
                queries.subtask_query(&state, &examples)?
            } else {
                queries.task_query(&state, &examples)?
            };
            let Some(action) = self.next_action(&query)? else {
                warn!(step, "no action from model");
                return Ok(finish(EpisodeOutcome::BackendFailed, step, state));
            };
            let rendered = self.catalog.render_action(&action)?;
            debug!(step, action = %rendered, "acting");
            state.record_action(&action.name, action.args.clone())?;

            let introspective = self.catalog.is_introspective(&action.name);
            if introspective {
                state.record_observation(&action.name, ACKNOWLEDGMENT)?;
                self.apply_control(&mut state, &action)?;
            } else {
                let result = sim.step(&[rendered])?.first()?;
                let observation = clean_observation(&result.observation);
                state.record_observation(&action.name, &observation)?;
                if result.done {
                    let outcome = if result.won {
                        EpisodeOutcome::Succeeded
                    } else {
                        EpisodeOutcome::EndedWithoutSuccess
                    };
                    return Ok(finish(outcome, step + 1, state));
                }
            }

            if state.is_exhausted() {
                return Ok(finish(EpisodeOutcome::Exhausted, step + 1, state));
            }

            if !introspective && self.should_check_done(&state) {
                self.check_done(&queries, &mut state, &examples)?;
            }
        }

        Ok(finish(EpisodeOutcome::TimedOut, self.options.max_steps, state))
    }

    fn next_action(&self, query: &[Message]) -> Result<Option<Action>, ContractError> {
        match self.options.style.action_mode {
            ActionMode::FreeText => {
                let Some(text) = self.llm.complete(query, &["\n".to_string()]) else {
                    return Ok(None);
                };
                let line = text.trim().trim_start_matches('>').trim_start();
                self.catalog.parse(line).map(Some)
            }
            ActionMode::Structured => {
                let Some(call) = self.llm.complete_with_actions(query, &self.catalog.specs()) else {
                    return Ok(None);
                };
                let args = self.catalog.arguments_from_json(&call.name, &call.arguments)?;
                Ok(Some(Action::new(call.name, args)))
            }
        }
    }

    fn apply_control(&self, state: &mut EpisodeState, action: &Action) -> Result<(), ContractError> {
        match action.name.as_str() {
            FINISH_SUBTASK => {
                state.advance_subtask();
                info!(subtask = state.current_label().unwrap_or_default(), "subtask finished by agent");
            }
            REPLACE_SUBTASK => {
                let label = action.args.get("subtask").map(String::as_str).unwrap_or_default();
                state.replace_current_subtask(label)?;
                info!(subtask = label, "subtask replaced by agent");
            }
            _ => {}
        }
        Ok(())
    }

    fn should_check_done(&self, state: &EpisodeState) -> bool {
        self.options.use_subtasks
            && !state.is_last_subtask()
            && !state.observations_for(state.current_index()).is_empty()
    }

    fn check_done(
        &self,
        queries: &QueryBuilder<'_>,
        state: &mut EpisodeState,
        examples: &[WorkedExample],
    ) -> Result<(), ContractError> {
        let query = queries.done_query(state, examples)?;
        let answer = self.llm.complete(&query, &["\n".to_string()]);
        if answer.is_some_and(|text| is_affirmative(&text)) {
            state.advance_subtask();
            info!(subtask = state.current_label().unwrap_or_default(), "subtask advanced");
        }
        Ok(())
    }
}

/// Done-check answers count as "yes" when they start with it, ignoring case.
pub fn is_affirmative(answer: &str) -> bool {
    answer.trim().to_lowercase().starts_with("yes")
}

fn finish(outcome: EpisodeOutcome, steps: usize, state: EpisodeState) -> EpisodeReport {
    info!(outcome = outcome.as_str(), steps, "episode finished");
    EpisodeReport {
        outcome,
        steps,
        state,
    }
}
