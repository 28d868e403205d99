//! MK-007: Error kinds raised by the engine and by actions.

use super::types::Value;
use indexmap::IndexMap;
use thiserror::Error;

/// Errors produced while defining or running a recipe.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("action '{action}' requires unbound input(s): {}", .missing.join(", "))]
    Binding { action: String, missing: Vec<String> },

    #[error("action '{action}' failed: {message}")]
    ActionFailed { action: String, message: String },

    #[error("step {} '{step}' failed: {}", .index + 1, summarize(.failures))]
    StepFailed {
        index: usize,
        step: String,
        failures: Vec<EngineError>,
        /// Results of the sibling actions that did succeed.
        partial: IndexMap<String, Value>,
    },

    #[error("step '{step}' produced result '{key}' more than once")]
    DuplicateResult { step: String, key: String },

    #[error("teardown of '{owner}' failed: {message}")]
    Teardown { owner: String, message: String },

    #[error("parameter '{name}' has no more values")]
    ExhaustedParameter { name: String },

    #[error("{0}")]
    Recipe(String),
}

fn summarize(failures: &[EngineError]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl EngineError {
    /// Flatten aggregated failures into their leaves.
    pub fn leaves(&self) -> Vec<&EngineError> {
        match self {
            Self::StepFailed { failures, .. } => failures.iter().flat_map(|f| f.leaves()).collect(),
            other => vec![other],
        }
    }
}

/// Errors an action reports back to its step.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("panicked: {0}")]
    Panicked(String),
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self::Failed(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self::Failed(message.to_string())
    }
}

/// Best-effort text for a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
