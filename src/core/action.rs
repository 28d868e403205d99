//! MK-005: The action contract.
//!
//! An action declares the context names it reads, runs with exactly those
//! bound as [`Args`], and reports progress through its own [`ActionSession`].
//! Cleanup is never implicit: an action that acquires something registers a
//! teardown hook on its session.

use super::error::ActionError;
use super::session::ActionSession;
use super::types::{ActionOutput, Args, Inputs};
use async_trait::async_trait;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use std::future::Future;
use std::sync::Arc;

/// A unit of side-effecting work inside a step.
#[async_trait]
pub trait Action: Send + Sync {
    /// Display name, also used for the action's session.
    fn name(&self) -> &str;

    /// Context names this action consumes.
    fn inputs(&self) -> Inputs;

    /// Result names merged into the context on success.
    fn outputs(&self) -> Vec<String> {
        Vec::new()
    }

    async fn run(&self, args: Args, session: ActionSession) -> Result<ActionOutput, ActionError>;
}

type ActionFuture = BoxFuture<'static, Result<ActionOutput, ActionError>>;
type BoxedFn = Box<dyn Fn(Args, ActionSession) -> ActionFuture + Send + Sync>;

/// An action built from an async closure. See [`action_fn`].
pub struct FnAction {
    name: String,
    inputs: Inputs,
    outputs: Vec<String>,
    func: BoxedFn,
}

impl FnAction {
    /// Declare the named results this closure returns.
    pub fn produces<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = names.into_iter().map(Into::into).collect();
        self
    }
}

/// Build an action from a name, its inputs and an async closure.
pub fn action_fn<F, Fut>(name: impl Into<String>, inputs: Inputs, func: F) -> FnAction
where
    F: Fn(Args, ActionSession) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ActionOutput, ActionError>> + Send + 'static,
{
    FnAction {
        name: name.into(),
        inputs,
        outputs: Vec::new(),
        func: Box::new(move |args, session| -> ActionFuture { Box::pin(func(args, session)) }),
    }
}

#[async_trait]
impl Action for FnAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Inputs {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<String> {
        self.outputs.clone()
    }

    async fn run(&self, args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
        (self.func)(args, session).await
    }
}

impl std::fmt::Debug for FnAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAction")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// Stores the whole output of an action under one result name.
pub struct Named {
    key: String,
    inner: Arc<dyn Action>,
}

/// Wrap `action` so its result lands in the context as `key`.
pub fn named(key: impl Into<String>, action: impl Action + 'static) -> Named {
    Named {
        key: key.into(),
        inner: Arc::new(action),
    }
}

impl Named {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn from_arc(key: impl Into<String>, inner: Arc<dyn Action>) -> Self {
        Self {
            key: key.into(),
            inner,
        }
    }
}

#[async_trait]
impl Action for Named {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn inputs(&self) -> Inputs {
        self.inner.inputs()
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.key.clone()]
    }

    async fn run(&self, args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
        let value = self.inner.run(args, session).await?.into_value();
        let mut map = IndexMap::new();
        map.insert(self.key.clone(), value);
        Ok(ActionOutput::Named(map))
    }
}
