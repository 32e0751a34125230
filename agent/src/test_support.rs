//! Test-only doubles for the model and the simulation, plus a small corpus.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::core::history::WorkedExample;
use crate::core::types::{Action, ActionCall, Args, Message, Observation, Step, Subtask};
use crate::io::corpus::Corpus;
use crate::io::llm::LlmClient;
use crate::io::simulation::{ResetOutcome, Simulation, StepBatch};

/// Model double that replays scripted answers and records every query.
///
/// Text answers (split, done-check, free-text actions) and structured answers
/// are queued separately. An empty queue answers `None`.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    texts: RefCell<VecDeque<Option<String>>>,
    calls: RefCell<VecDeque<Option<ActionCall>>>,
    pub text_queries: RefCell<Vec<Vec<Message>>>,
    pub action_queries: RefCell<Vec<Vec<Message>>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(self, answer: &str) -> Self {
        self.texts.borrow_mut().push_back(Some(answer.to_string()));
        self
    }

    pub fn no_text(self) -> Self {
        self.texts.borrow_mut().push_back(None);
        self
    }

    pub fn call(self, name: &str, arguments: Value) -> Self {
        self.calls.borrow_mut().push_back(Some(ActionCall {
            name: name.to_string(),
            arguments,
        }));
        self
    }

    pub fn no_call(self) -> Self {
        self.calls.borrow_mut().push_back(None);
        self
    }

    pub fn remaining_texts(&self) -> usize {
        self.texts.borrow().len()
    }
}

impl LlmClient for ScriptedLlm {
    fn complete(&self, query: &[Message], _stop: &[String]) -> Option<String> {
        self.text_queries.borrow_mut().push(query.to_vec());
        self.texts.borrow_mut().pop_front().flatten()
    }

    fn complete_with_actions(&self, query: &[Message], _specs: &[Value]) -> Option<ActionCall> {
        self.action_queries.borrow_mut().push(query.to_vec());
        self.calls.borrow_mut().pop_front().flatten()
    }
}

/// Simulation double with scripted resets and step results.
///
/// Unscripted steps observe `Nothing happens.` without ending the episode.
#[derive(Debug, Default)]
pub struct ScriptedSimulation {
    resets: VecDeque<ResetOutcome>,
    steps: VecDeque<(String, bool, bool)>,
    pub actions: Vec<String>,
    pub reset_count: usize,
    pub closed: bool,
}

impl ScriptedSimulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_to(mut self, observation: &str, gamefile: &str) -> Self {
        self.resets.push_back(ResetOutcome {
            observation: observation.to_string(),
            gamefile: gamefile.to_string(),
        });
        self
    }

    pub fn observe(mut self, observation: &str) -> Self {
        self.steps.push_back((observation.to_string(), false, false));
        self
    }

    pub fn finish(mut self, observation: &str, won: bool) -> Self {
        self.steps.push_back((observation.to_string(), true, won));
        self
    }
}

impl Simulation for ScriptedSimulation {
    fn reset(&mut self) -> Result<ResetOutcome> {
        self.reset_count += 1;
        self.resets
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted reset left"))
    }

    fn step(&mut self, actions: &[String]) -> Result<StepBatch> {
        self.actions.extend(actions.iter().cloned());
        let (observation, done, won) = self
            .steps
            .pop_front()
            .unwrap_or_else(|| ("Nothing happens.".to_string(), false, false));
        Ok(StepBatch {
            observations: vec![observation],
            rewards: vec![if won { 1.0 } else { 0.0 }],
            dones: vec![done],
            won: vec![won],
        })
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

pub fn args(pairs: &[(&str, &str)]) -> Args {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn action(name: &str, pairs: &[(&str, &str)]) -> Step {
    Step::Action(Action::new(name, args(pairs)))
}

pub fn observation(action: &str, text: &str) -> Step {
    Step::Observation(Observation {
        action: action.to_string(),
        text: text.to_string(),
    })
}

/// Two-subtask `put` example.
pub fn put_example(n: usize) -> WorkedExample {
    WorkedExample::new(
        format!("Your task is to: put some spraybottle {n} on toilet."),
        vec![
            Subtask {
                label: "find spraybottle".to_string(),
                steps: vec![
                    action("goto", &[("recep", "cabinet"), ("recep_idx", "1")]),
                    observation("goto", "On the cabinet 1, you see a cloth 1."),
                    action("goto", &[("recep", "cabinet"), ("recep_idx", "2")]),
                    observation("goto", "On the cabinet 2, you see a spraybottle 2."),
                ],
            },
            Subtask {
                label: "put spraybottle on toilet".to_string(),
                steps: vec![
                    action(
                        "take",
                        &[
                            ("object", "spraybottle"),
                            ("object_idx", "2"),
                            ("recep", "cabinet"),
                            ("recep_idx", "2"),
                        ],
                    ),
                    observation("take", "You pick up the spraybottle 2 from the cabinet 2."),
                ],
            },
        ],
    )
}

/// Corpus holding `react_put_0` and `react_put_1`.
pub fn sample_corpus() -> Corpus {
    let examples: BTreeMap<String, WorkedExample> = (0..2)
        .map(|n| (format!("react_put_{n}"), put_example(n)))
        .collect();
    Corpus::new(examples)
}

/// An environment name in the `put` family.
pub const PUT_ENV: &str = "pick_and_place_simple-Mug-None-Shelf-1/trial_T2019";
