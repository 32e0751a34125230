//! Subtask-decomposing agent for text household simulations.
//!
//! An episode asks a language model to split the task into subtasks, then
//! repeatedly asks for the next action within the current subtask, applies
//! it to the simulation and asks whether the subtask is done. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (action catalog, history store,
//!   query building). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (config, corpus files, the model and
//!   simulation bridge processes). Behind traits so tests can script them.
//!
//! [`episode`] coordinates both into the per-episode state machine.

pub mod core;
pub mod episode;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
