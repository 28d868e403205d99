//! Recipe engine: parameters, permutations, sessions, steps, runner, recipe files.

pub mod action;
pub mod error;
pub mod parameter;
pub mod parser;
pub mod permutation;
pub mod recipe;
pub mod resolver;
pub mod runner;
pub mod session;
pub mod step;
pub mod types;

pub use action::{action_fn, named, Action};
pub use error::{ActionError, EngineError};
pub use parameter::{ParameterStream, ReusePolicy};
pub use recipe::{Recipe, RunSummary};
pub use session::{ActionSession, SessionStatus};
pub use types::{ActionOutput, Args, Context, Inputs, Permutation, Value};
