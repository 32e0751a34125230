//! Model-facing conversations built from episode history.
//!
//! Every query is a pure function of the live [`EpisodeState`], the worked
//! examples and the [`QueryStyle`]. Turn text comes from embedded templates.

use std::sync::LazyLock;

use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};

use crate::core::catalog::Catalog;
use crate::core::error::ContractError;
use crate::core::history::{EpisodeState, Transcript, WorkedExample};
use crate::core::types::{FunctionCall, Message, Step};

pub const SPLIT_SYSTEM: &str = "You are an assistant that splits tasks into subtasks.";
pub const SUBTASK_SYSTEM: &str = "You are an assistant that interacts with a household to solve a specific subtask of a larger task.";
pub const DONE_SYSTEM: &str = "You are an assistant that decides whether a task has been completed.";
pub const TASK_SYSTEM: &str = "You are an assistant that interacts with a household to solve tasks.";

const MEMORY_TEMPLATE: &str = include_str!("prompts/memory.txt");
const SPLIT_TEMPLATE: &str = include_str!("prompts/split.txt");
const SUBTASK_TEMPLATE: &str = include_str!("prompts/subtask.txt");
const DONE_TEMPLATE: &str = include_str!("prompts/done.txt");
const TASK_TEMPLATE: &str = include_str!("prompts/task.txt");

static TEMPLATES: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    for (name, source) in [
        ("memory", MEMORY_TEMPLATE),
        ("split", SPLIT_TEMPLATE),
        ("subtask", SUBTASK_TEMPLATE),
        ("done", DONE_TEMPLATE),
        ("task", TASK_TEMPLATE),
    ] {
        env.add_template(name, source)
            .expect("embedded query template should be valid");
    }
    env
});

fn render(name: &str, ctx: minijinja::Value) -> String {
    TEMPLATES
        .get_template(name)
        .and_then(|template| template.render(ctx))
        .expect("embedded query template rendering should not fail")
}

/// How recorded actions and observations appear in a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMode {
    /// Actions are assistant text, observations are user text.
    #[default]
    FreeText,
    /// Actions are function calls, observations are function results.
    Structured,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStyle {
    pub action_mode: ActionMode,
    /// List the base world actions before the split question.
    pub describe_actions_in_split: bool,
}

#[derive(Debug, Serialize)]
struct ActionSummary {
    name: &'static str,
    description: &'static str,
}

/// Builds conversations for the split, subtask, done-check and task decisions.
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder<'a> {
    catalog: &'a Catalog,
    style: QueryStyle,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(catalog: &'a Catalog, style: QueryStyle) -> Self {
        Self { catalog, style }
    }

    pub fn style(&self) -> QueryStyle {
        self.style
    }

    /// Ask for the task's subtask list. Each example answers with its labels.
    pub fn split_query(&self, state: &EpisodeState, examples: &[WorkedExample]) -> Vec<Message> {
        let mut chat = vec![Message::system(SPLIT_SYSTEM)];
        for example in examples {
            chat.push(Message::user(self.split_turn(example.task_description())));
            let labels: Vec<String> = example
                .subtasks()
                .iter()
                .map(|subtask| format!("- {}", subtask.label))
                .collect();
            chat.push(Message::assistant(labels.join("\n")));
        }
        chat.push(Message::user(self.split_turn(state.task_description())));
        chat
    }

    /// Ask for the next action within the current subtask.
    pub fn subtask_query(
        &self,
        state: &EpisodeState,
        examples: &[WorkedExample],
    ) -> Result<Vec<Message>, ContractError> {
        let index = state.current_index();
        let mut chat = vec![Message::system(SUBTASK_SYSTEM)];
        for example in examples {
            if example.subtasks().get(index).is_none() {
                continue;
            }
            chat.extend(self.subtask_turns(example, index, &[])?);
        }
        chat.extend(self.subtask_turns(state, index, state.memory())?);
        Ok(chat)
    }

    /// Ask whether the current subtask is complete.
    ///
    /// Each example contributes a negative (final observation withheld,
    /// answered `No.`) and then a positive (answered `Yes.`) at the same index.
    pub fn done_query(
        &self,
        state: &EpisodeState,
        examples: &[WorkedExample],
    ) -> Result<Vec<Message>, ContractError> {
        let index = state.current_index();
        let mut chat = vec![Message::system(DONE_SYSTEM)];
        for example in examples {
            let Ok(subtask) = example.subtask(index) else {
                continue;
            };
            let mut observations = example.observations_for(index);
            let complete = done_turn(&subtask.label, &observations);
            observations.pop();
            chat.push(Message::user(done_turn(&subtask.label, &observations)));
            chat.push(Message::assistant("No."));
            chat.push(Message::user(complete));
            chat.push(Message::assistant("Yes."));
        }
        let subtask = state.subtask(index)?;
        chat.push(Message::user(done_turn(
            &subtask.label,
            &state.observations_for(index),
        )));
        Ok(chat)
    }

    /// Ask for the next action with no decomposition.
    pub fn task_query(
        &self,
        state: &EpisodeState,
        examples: &[WorkedExample],
    ) -> Result<Vec<Message>, ContractError> {
        let mut chat = vec![Message::system(TASK_SYSTEM)];
        for example in examples {
            let last = example.subtasks().len().saturating_sub(1);
            chat.extend(self.task_turns(example, last, &[])?);
        }
        state.subtask(state.current_index())?;
        chat.extend(self.task_turns(state, state.current_index(), state.memory())?);
        Ok(chat)
    }

    fn split_turn(&self, task: &str) -> String {
        let actions: Vec<ActionSummary> = if self.style.describe_actions_in_split {
            self.catalog
                .world_actions()
                .map(|def| ActionSummary {
                    name: def.name,
                    description: def.description,
                })
                .collect()
        } else {
            Vec::new()
        };
        render("split", context! { task => task.trim(), actions => actions })
    }

    fn subtask_turns(
        &self,
        transcript: &impl Transcript,
        index: usize,
        memory: &[String],
    ) -> Result<Vec<Message>, ContractError> {
        let subtask = transcript.subtask(index)?;
        let progress: Vec<&str> = (0..index)
            .flat_map(|earlier| transcript.observations_for(earlier))
            .collect();
        let user = render(
            "subtask",
            context! {
                memory => memory_block(memory),
                task => transcript.task_description().trim(),
                show_progress => index > 0,
                progress => progress,
                label => &subtask.label,
            },
        );
        let mut turns = vec![Message::user(user)];
        turns.extend(self.transcript_turns(&subtask.steps)?);
        Ok(turns)
    }

    fn task_turns(
        &self,
        transcript: &impl Transcript,
        through: usize,
        memory: &[String],
    ) -> Result<Vec<Message>, ContractError> {
        let user = render(
            "task",
            context! {
                memory => memory_block(memory),
                task => transcript.task_description().trim(),
            },
        );
        let mut turns = vec![Message::user(user)];
        for subtask in transcript.subtasks().iter().take(through + 1) {
            turns.extend(self.transcript_turns(&subtask.steps)?);
        }
        Ok(turns)
    }

    fn transcript_turns(&self, steps: &[Step]) -> Result<Vec<Message>, ContractError> {
        steps
            .iter()
            .map(|step| match (step, self.style.action_mode) {
                (Step::Action(action), ActionMode::FreeText) => {
                    Ok(Message::assistant(self.catalog.render_action(action)?))
                }
                (Step::Action(action), ActionMode::Structured) => {
                    let arguments = self.catalog.call_arguments(&action.name, &action.args)?;
                    Ok(Message::assistant_call(FunctionCall {
                        name: action.name.clone(),
                        arguments: arguments.to_string(),
                    }))
                }
                (Step::Observation(obs), ActionMode::FreeText) => Ok(Message::user(&obs.text)),
                (Step::Observation(obs), ActionMode::Structured) => {
                    Ok(Message::function(&obs.action, &obs.text))
                }
            })
            .collect()
    }
}

fn memory_block(memory: &[String]) -> Option<String> {
    (!memory.is_empty()).then(|| render("memory", context! { memory => memory }))
}

fn done_turn(label: &str, observations: &[&str]) -> String {
    render(
        "done",
        context! { label => label, observations => observations },
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::catalog::ActionSet;
    use crate::core::history::DEFAULT_MARKER;
    use crate::core::types::{Action, Args, Observation, Role, Subtask};

    fn args(pairs: &[(&str, &str)]) -> Args {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn goto(recep: &str, idx: &str) -> Step {
        Step::Action(Action::new(
            "goto",
            args(&[("recep", recep), ("recep_idx", idx)]),
        ))
    }

    fn obs(action: &str, text: &str) -> Step {
        Step::Observation(Observation {
            action: action.to_string(),
            text: text.to_string(),
        })
    }

    fn example() -> WorkedExample {
        WorkedExample::new(
            "Your task is to: put some spraybottle on toilet.",
            vec![
                Subtask {
                    label: "find spraybottle".to_string(),
                    steps: vec![
                        goto("cabinet", "1"),
                        obs("goto", "You see a cloth 1."),
                        goto("cabinet", "2"),
                        obs("goto", "You see a spraybottle 2."),
                    ],
                },
                Subtask {
                    label: "put spraybottle on toilet".to_string(),
                    steps: vec![goto("toilet", "1"), obs("goto", "You see a soapbottle 2.")],
                },
            ],
        )
    }

    fn live(memory: Vec<String>) -> EpisodeState {
        let mut state = EpisodeState::new("Your task is to: put a clean mug in coffeemachine.", memory);
        state
            .set_subtasks("- find mug\n- clean mug\n- put mug", DEFAULT_MARKER)
            .expect("subtasks");
        state
    }

    fn catalog() -> Catalog {
        Catalog::new(ActionSet {
            think: true,
            subtask_control: false,
        })
    }

    #[test]
    fn split_query_lists_example_labels_then_live_task() {
        let catalog = catalog();
        let builder = QueryBuilder::new(&catalog, QueryStyle::default());
        let chat = builder.split_query(&live(Vec::new()), &[example()]);

        assert_eq!(chat.len(), 4);
        assert_eq!(chat[0], Message::system(SPLIT_SYSTEM));
        assert_eq!(
            chat[1].content_str(),
            "Your task is to: put some spraybottle on toilet.\nWhat subtasks does this task entail?"
        );
        assert_eq!(
            chat[2].content_str(),
            "- find spraybottle\n- put spraybottle on toilet"
        );
        assert_eq!(chat[3].role, Role::User);
        assert!(chat[3].content_str().starts_with("Your task is to: put a clean mug"));
    }

    #[test]
    fn split_query_can_summarize_world_actions() {
        let catalog = catalog();
        let style = QueryStyle {
            describe_actions_in_split: true,
            ..QueryStyle::default()
        };
        let chat = QueryBuilder::new(&catalog, style).split_query(&live(Vec::new()), &[]);
        let user = chat[1].content_str();
        assert!(user.contains("Here is a summary of the possible actions you will be able to take:\ngoto: Go to a location or receptacle\n"));
        assert!(!user.contains("think:"));
        assert!(user.ends_with("inventory: List the objects you are carrying\nWhat subtasks does this task entail?"));
    }

    #[test]
    fn first_subtask_query_has_no_progress_section() {
        let catalog = catalog();
        let builder = QueryBuilder::new(&catalog, QueryStyle::default());
        let chat = builder.subtask_query(&live(Vec::new()), &[]).expect("query");
        assert_eq!(chat.len(), 2);
        assert_eq!(
            chat[1].content_str(),
            "Your task is to: put a clean mug in coffeemachine.\n\nThe current subtask: find mug"
        );
    }

    #[test]
    fn later_subtask_query_summarizes_earlier_observations_and_examples() {
        let catalog = catalog();
        let builder = QueryBuilder::new(&catalog, QueryStyle::default());
        let mut state = live(Vec::new());
        state
            .record_action("goto", args(&[("recep", "countertop"), ("recep_idx", "1")]))
            .expect("record");
        state.record_observation("goto", "You see a mug 1.").expect("record");
        state
            .record_action("think", args(&[("thought", "Found it.")]))
            .expect("record");
        state.record_observation("think", "OK.").expect("record");
        state.advance_subtask();

        let chat = builder.subtask_query(&state, &[example()]).expect("query");
        // system, example user + 2 steps, live user
        assert_eq!(chat.len(), 5);
        assert_eq!(
            chat[1].content_str(),
            "Your task is to: put some spraybottle on toilet.\n\nHere is what you have done so far:\nYou see a cloth 1.\nYou see a spraybottle 2.\nThe current subtask: put spraybottle on toilet"
        );
        assert_eq!(chat[2], Message::assistant("go to toilet 1"));
        assert_eq!(chat[3], Message::user("You see a soapbottle 2."));
        assert_eq!(
            chat[4].content_str(),
            "Your task is to: put a clean mug in coffeemachine.\n\nHere is what you have done so far:\nYou see a mug 1.\nThe current subtask: clean mug"
        );
    }

    #[test]
    fn examples_missing_the_live_index_are_skipped() {
        let catalog = catalog();
        let builder = QueryBuilder::new(&catalog, QueryStyle::default());
        let mut state = live(Vec::new());
        state.advance_subtask();
        state.advance_subtask();
        let chat = builder.subtask_query(&state, &[example()]).expect("query");
        assert_eq!(chat.len(), 2);
        let done = builder.done_query(&state, &[example()]).expect("query");
        assert_eq!(done.len(), 2);
    }

    #[test]
    fn memory_block_precedes_live_task_only() {
        let catalog = catalog();
        let builder = QueryBuilder::new(&catalog, QueryStyle::default());
        let state = live(vec!["Tried the sink first.\n".to_string(), "Look in cabinets.".to_string()]);
        let chat = builder.subtask_query(&state, &[example()]).expect("query");
        let live_turn = chat.last().expect("live turn").content_str();
        assert!(live_turn.starts_with(
            "Your memory for the task below:\nTrial 0:\nTried the sink first.\nTrial 1:\nLook in cabinets.\nHere is the task:\nYour task is to:"
        ));
        assert!(!chat[1].content_str().contains("Your memory"));
    }

    #[test]
    fn done_query_pairs_negative_then_positive_per_example() {
        let catalog = catalog();
        let builder = QueryBuilder::new(&catalog, QueryStyle::default());
        let mut state = live(Vec::new());
        state.record_observation("goto", "You see a mug 1.").expect("record");

        let chat = builder.done_query(&state, &[example()]).expect("query");
        assert_eq!(chat.len(), 6);
        assert_eq!(chat[0], Message::system(DONE_SYSTEM));
        assert_eq!(
            chat[1].content_str(),
            "Here is what you have done so far:\nYou see a cloth 1.\nHave you entirely completed the task 'find spraybottle'?"
        );
        assert_eq!(chat[2], Message::assistant("No."));
        assert!(chat[3].content_str().contains("You see a spraybottle 2.\n"));
        assert_eq!(chat[4], Message::assistant("Yes."));
        assert_eq!(
            chat[5].content_str(),
            "Here is what you have done so far:\nYou see a mug 1.\nHave you entirely completed the task 'find mug'?"
        );
    }

    #[test]
    fn done_query_with_empty_example_observations_withholds_nothing() {
        let catalog = catalog();
        let builder = QueryBuilder::new(&catalog, QueryStyle::default());
        let bare = WorkedExample::new("task", vec![Subtask::new("look around")]);
        let chat = builder.done_query(&live(Vec::new()), &[bare]).expect("query");
        assert_eq!(chat[1].content_str(), chat[3].content_str());
        assert_eq!(
            chat[1].content_str(),
            "Here is what you have done so far:\nHave you entirely completed the task 'look around'?"
        );
    }

    #[test]
    fn queries_without_subtasks_are_contract_errors() {
        let catalog = catalog();
        let builder = QueryBuilder::new(&catalog, QueryStyle::default());
        let state = EpisodeState::new("task", Vec::new());
        assert_eq!(
            builder.subtask_query(&state, &[]).unwrap_err(),
            ContractError::EmptyHistory { index: 0 }
        );
        assert_eq!(
            builder.done_query(&state, &[]).unwrap_err(),
            ContractError::EmptyHistory { index: 0 }
        );
        assert!(builder.task_query(&state, &[]).is_err());
    }

    #[test]
    fn structured_mode_emits_function_turns() {
        let catalog = catalog();
        let style = QueryStyle {
            action_mode: ActionMode::Structured,
            ..QueryStyle::default()
        };
        let builder = QueryBuilder::new(&catalog, style);
        let mut state = live(Vec::new());
        state
            .record_action("goto", args(&[("recep", "sinkbasin"), ("recep_idx", "1")]))
            .expect("record");
        state.record_observation("goto", "You see a faucet 1.").expect("record");

        let chat = builder.subtask_query(&state, &[]).expect("query");
        let call = chat[2].function_call.as_ref().expect("function call");
        assert_eq!(call.name, "goto");
        let parsed: serde_json::Value = serde_json::from_str(&call.arguments).expect("json");
        assert_eq!(parsed, json!({ "recep": "sinkbasin", "recep_idx": 1 }));
        assert_eq!(chat[2].content, None);
        assert_eq!(chat[3], Message::function("goto", "You see a faucet 1."));
    }

    #[test]
    fn task_query_replays_every_subtask_up_to_current() {
        let catalog = catalog();
        let builder = QueryBuilder::new(&catalog, QueryStyle::default());
        let mut state = EpisodeState::new("Your task is to: examine a book.", vec!["Be quick.".to_string()]);
        state.use_catch_all();
        state.record_action("look", Args::new()).expect("record");
        state.record_observation("look", "You are in the middle of a room.").expect("record");

        let chat = builder.task_query(&state, &[example()]).expect("query");
        assert_eq!(chat[0], Message::system(TASK_SYSTEM));
        // example: user + 4 + 2 steps; live: user + 2 steps
        assert_eq!(chat.len(), 1 + 7 + 3);
        assert_eq!(chat[1].content_str(), "Your task is to: put some spraybottle on toilet.");
        assert_eq!(chat[7], Message::user("You see a soapbottle 2."));
        assert!(chat[8].content_str().ends_with("Here is the task:\nYour task is to: examine a book."));
        assert_eq!(chat[9], Message::assistant("look"));
    }

    #[test]
    fn query_building_leaves_examples_untouched() {
        let catalog = catalog();
        let builder = QueryBuilder::new(&catalog, QueryStyle::default());
        let examples = vec![example()];
        let before = examples.clone();
        let state = live(Vec::new());
        builder.split_query(&state, &examples);
        builder.subtask_query(&state, &examples).expect("query");
        builder.done_query(&state, &examples).expect("query");
        assert_eq!(examples, before);
    }
}
