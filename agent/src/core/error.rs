//! Contract violations raised by the pure core.
//!
//! These indicate the state machine was driven incorrectly or the model
//! produced output of the wrong shape. They are surfaced to the caller,
//! never swallowed.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    /// A split response contained a line without the subtask marker, or no labels at all.
    #[error("malformed subtask list: {reason}")]
    MalformedSubtaskList { reason: String },

    /// No catalog entry's match prefix equals the leading token.
    #[error("no action matches '{input}'")]
    NoMatchingAction { input: String },

    /// A parameter was missing, of the wrong kind, or the action string was too short.
    #[error("invalid parameters for '{action}': {reason}")]
    InvalidParameters { action: String, reason: String },

    /// The name is not part of the catalog's selected action set.
    #[error("unknown action '{name}'")]
    UnknownAction { name: String },

    /// A query or record was requested for a subtask that does not exist.
    #[error("no history for subtask {index}")]
    EmptyHistory { index: usize },
}
