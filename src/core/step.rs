//! MK-006: Step executor: binds, fans out and merges one step's actions.
//!
//! All sessions are created before any action starts. Every action is bound
//! before any action starts. Siblings are polled together on the current task
//! and the step only reports once every one of them has finished.

use super::action::Action;
use super::error::{panic_message, ActionError, EngineError};
use super::session::{ActionSession, SessionStatus, TeardownHook};
use super::types::{ActionOutput, Args, Context, Inputs};
use crate::progress::EventBus;
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// An ordered stage of a recipe; its actions run concurrently.
#[derive(Clone)]
pub struct Step {
    index: usize,
    name: String,
    actions: Vec<Arc<dyn Action>>,
}

/// What running a step left behind.
#[derive(Debug)]
pub struct StepOutput {
    /// Root session of the step, with one child per action.
    pub session: ActionSession,
    /// Hooks registered during the step, in registration order.
    pub hooks: Vec<TeardownHook>,
    /// Named results of this step, or why it failed.
    pub result: Result<Context, EngineError>,
}

impl Step {
    pub fn new(index: usize, name: impl Into<String>, actions: Vec<Arc<dyn Action>>) -> Self {
        Self {
            index,
            name: name.into(),
            actions,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn actions(&self) -> &[Arc<dyn Action>] {
        &self.actions
    }

    /// Session title shown by reporters, e.g. `1. setup`.
    pub fn title(&self) -> String {
        format!("{}. {}", self.index + 1, self.name)
    }

    /// Run every action of the step against `context`.
    pub async fn run(&self, context: &Context, bus: &EventBus) -> StepOutput {
        let root = ActionSession::root(self.title(), bus);
        let sessions: Vec<ActionSession> = self
            .actions
            .iter()
            .map(|a| root.make_child(a.name()))
            .collect();

        let mut bound = Vec::with_capacity(self.actions.len());
        let mut binding_errors = Vec::new();
        for (action, session) in self.actions.iter().zip(&sessions) {
            match bind(action.as_ref(), context) {
                Ok(args) => bound.push(args),
                Err(e) => {
                    session.fail(e.to_string());
                    binding_errors.push(e);
                }
            }
        }
        if !binding_errors.is_empty() {
            root.fail("binding failed");
            tracing::warn!(step = %self.name, errors = binding_errors.len(), "step not started");
            let result = if binding_errors.len() == 1 {
                Err(binding_errors.remove(0))
            } else {
                Err(EngineError::StepFailed {
                    index: self.index,
                    step: self.name.clone(),
                    failures: binding_errors,
                    partial: Context::new(),
                })
            };
            return StepOutput {
                session: root,
                hooks: Vec::new(),
                result,
            };
        }

        tracing::debug!(step = %self.name, actions = self.actions.len(), "starting step");
        root.running("");
        let outcomes = join_all(
            self.actions
                .iter()
                .zip(bound)
                .zip(&sessions)
                .map(|((action, args), session)| invoke(action.as_ref(), args, session.clone())),
        )
        .await;

        let mut results = Context::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(ActionOutput::Named(map)) => {
                    for (key, value) in map {
                        if results.contains_key(&key) {
                            failures.push(EngineError::DuplicateResult {
                                step: self.name.clone(),
                                key,
                            });
                        } else {
                            results.insert(key, value);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => failures.push(e),
            }
        }

        let hooks = root.take_teardown_hooks();
        let result = if failures.is_empty() {
            root.succeed("");
            tracing::debug!(step = %self.name, results = results.len(), "step finished");
            Ok(results)
        } else {
            root.fail(format!("{} of {} failed", failures.len(), self.actions.len()));
            Err(EngineError::StepFailed {
                index: self.index,
                step: self.name.clone(),
                failures,
                partial: results,
            })
        };
        StepOutput {
            session: root,
            hooks,
            result,
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.actions.iter().map(|a| a.name()).collect();
        f.debug_struct("Step")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("actions", &names)
            .finish()
    }
}

/// Pick the arguments an action asked for out of `context`.
pub fn bind(action: &dyn Action, context: &Context) -> Result<Args, EngineError> {
    match action.inputs() {
        Inputs::All => Ok(Args::new(context.clone())),
        Inputs::Named(names) => {
            let missing: Vec<String> = names
                .iter()
                .filter(|n| !context.contains_key(n.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(EngineError::Binding {
                    action: action.name().to_string(),
                    missing,
                });
            }
            Ok(names
                .iter()
                .filter_map(|n| context.get(n).map(|v| (n.clone(), v.clone())))
                .collect())
        }
    }
}

/// Run one action to a terminal session status.
async fn invoke(
    action: &dyn Action,
    args: Args,
    session: ActionSession,
) -> Result<ActionOutput, EngineError> {
    let name = action.name().to_string();
    let failed = |message: String| EngineError::ActionFailed {
        action: name.clone(),
        message,
    };

    let outcome = AssertUnwindSafe(action.run(args, session.clone()))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(ActionError::Panicked(panic_message(payload.as_ref()))));

    match outcome {
        Ok(_) if session.status() == SessionStatus::Failure => {
            let message = session
                .message()
                .unwrap_or_else(|| "marked as failed".to_string());
            tracing::warn!(action = %name, %message, "action reported failure");
            Err(failed(message))
        }
        Ok(output) => {
            if !session.is_resolved() {
                session.succeed(session.message().unwrap_or_default());
            }
            Ok(output)
        }
        Err(e) => {
            let message = e.to_string();
            session.fail(message.clone());
            tracing::warn!(action = %name, error = %message, "action failed");
            Err(failed(message))
        }
    }
}
