//! MK-004: Action sessions: per-action status, log, children and teardown hooks.
//!
//! A session is a cheap cloneable handle. Every mutation publishes a
//! [`ProgressEvent::Session`] on the tree's event bus; publishing never waits
//! for a subscriber.
//!
//! Status machine: `Setup -> Running -> {Success, Failure}`. Setup and Running
//! may repeat; Success and Failure are terminal and later status changes are
//! ignored.

use super::error::ActionError;
use crate::progress::{EventBus, ProgressEvent, SessionChange};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Setup,
    Running,
    Success,
    Failure,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Future returned by a teardown hook.
pub type HookFuture = BoxFuture<'static, Result<(), ActionError>>;

/// A deferred cleanup registered by an action.
pub struct TeardownHook {
    seq: u64,
    owner: String,
    run: Box<dyn FnOnce() -> HookFuture + Send>,
}

impl TeardownHook {
    /// Name of the session that registered the hook.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Registration sequence number within its session tree.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub async fn run(self) -> Result<(), ActionError> {
        (self.run)().await
    }
}

impl fmt::Debug for TeardownHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeardownHook")
            .field("seq", &self.seq)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Read-only copy of a session tree, for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub name: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub log: Vec<String>,
    #[serde(default)]
    pub children: Vec<SessionSnapshot>,
}

struct Tree {
    bus: EventBus,
    next_seq: AtomicU64,
}

struct State {
    status: SessionStatus,
    message: Option<String>,
    log: Vec<String>,
    children: Vec<ActionSession>,
    hooks: Vec<TeardownHook>,
}

struct Node {
    name: String,
    depth: usize,
    tree: Arc<Tree>,
    state: Mutex<State>,
}

/// Status and lifecycle handle owned by one action's execution.
#[derive(Clone)]
pub struct ActionSession {
    node: Arc<Node>,
}

impl ActionSession {
    /// A standalone session whose events go nowhere.
    pub fn new(name: impl Into<String>) -> Self {
        Self::root(name, &EventBus::detached())
    }

    /// The root of a new session tree publishing on `bus`.
    pub fn root(name: impl Into<String>, bus: &EventBus) -> Self {
        let tree = Arc::new(Tree {
            bus: bus.clone(),
            next_seq: AtomicU64::new(0),
        });
        let session = Self::with_tree(name.into(), 0, tree);
        session.publish(SessionChange::Created);
        session
    }

    fn with_tree(name: String, depth: usize, tree: Arc<Tree>) -> Self {
        Self {
            node: Arc::new(Node {
                name,
                depth,
                tree,
                state: Mutex::new(State {
                    status: SessionStatus::Setup,
                    message: None,
                    log: Vec::new(),
                    children: Vec::new(),
                    hooks: Vec::new(),
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.node.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, change: SessionChange) {
        self.node.tree.bus.publish(ProgressEvent::Session {
            session: self.clone(),
            change,
        });
    }

    /// Create a child session owned by this one.
    pub fn make_child(&self, name: impl Into<String>) -> ActionSession {
        let child = Self::with_tree(name.into(), self.node.depth + 1, Arc::clone(&self.node.tree));
        self.state().children.push(child.clone());
        child.publish(SessionChange::Created);
        child
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Distance from the root of the tree (the step session is 0).
    pub fn depth(&self) -> usize {
        self.node.depth
    }

    pub fn status(&self) -> SessionStatus {
        self.state().status
    }

    pub fn message(&self) -> Option<String> {
        self.state().message.clone()
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn children(&self) -> Vec<ActionSession> {
        self.state().children.clone()
    }

    /// True once the session reached Success or Failure.
    pub fn is_resolved(&self) -> bool {
        self.status().is_terminal()
    }

    /// Replace the status message. A session still in Setup becomes Running.
    pub fn set_message(&self, msg: impl Into<String>) {
        {
            let mut state = self.state();
            if state.status.is_terminal() {
                return;
            }
            state.message = non_empty(msg.into());
            state.status = SessionStatus::Running;
        }
        self.publish(SessionChange::Message);
    }

    /// Mark the session as running; an empty message clears the previous one.
    pub fn running(&self, msg: impl Into<String>) {
        self.transition(SessionStatus::Running, non_empty(msg.into()));
    }

    /// Mark the session as successfully finished.
    pub fn succeed(&self, msg: impl Into<String>) {
        self.transition(SessionStatus::Success, non_empty(msg.into()));
    }

    /// Mark the session as failed.
    pub fn fail(&self, msg: impl Into<String>) {
        self.transition(SessionStatus::Failure, non_empty(msg.into()));
    }

    pub(crate) fn transition(&self, status: SessionStatus, message: Option<String>) {
        {
            let mut state = self.state();
            if state.status.is_terminal() {
                tracing::debug!(
                    session = %self.node.name,
                    current = %state.status,
                    requested = %status,
                    "ignoring status change on resolved session"
                );
                return;
            }
            state.status = status;
            state.message = message;
        }
        self.publish(SessionChange::Status(status));
    }

    /// Append a line to the session log without touching its status.
    pub fn log(&self, line: impl AsRef<str>) {
        let line = line.as_ref().trim_end().to_string();
        self.state().log.push(line.clone());
        self.publish(SessionChange::Log(line));
    }

    /// Register a cleanup to run when the permutation unwinds.
    ///
    /// Every call adds one more hook. Hooks from the whole tree run in
    /// reverse registration order.
    pub fn add_teardown_hook<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        let seq = self.node.tree.next_seq.fetch_add(1, Ordering::SeqCst);
        self.state().hooks.push(TeardownHook {
            seq,
            owner: self.node.name.clone(),
            run: Box::new(move || -> HookFuture { Box::pin(hook()) }),
        });
    }

    /// Number of hooks registered on this session and its descendants.
    pub fn pending_hooks(&self) -> usize {
        let state = self.state();
        state.hooks.len()
            + state
                .children
                .iter()
                .map(ActionSession::pending_hooks)
                .sum::<usize>()
    }

    /// Drain every hook of this tree, in registration order.
    pub fn take_teardown_hooks(&self) -> Vec<TeardownHook> {
        let mut hooks = Vec::new();
        self.drain_hooks(&mut hooks);
        hooks.sort_by_key(TeardownHook::seq);
        hooks
    }

    fn drain_hooks(&self, into: &mut Vec<TeardownHook>) {
        let children = {
            let mut state = self.state();
            into.append(&mut state.hooks);
            state.children.clone()
        };
        for child in &children {
            child.drain_hooks(into);
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (status, message, log, children) = {
            let state = self.state();
            (
                state.status,
                state.message.clone(),
                state.log.clone(),
                state.children.clone(),
            )
        };
        SessionSnapshot {
            name: self.node.name.clone(),
            status,
            message,
            log,
            children: children.iter().map(ActionSession::snapshot).collect(),
        }
    }
}

impl fmt::Debug for ActionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSession")
            .field("name", &self.node.name)
            .field("depth", &self.node.depth)
            .field("status", &self.status())
            .finish()
    }
}

fn non_empty(msg: String) -> Option<String> {
    if msg.is_empty() {
        None
    } else {
        Some(msg)
    }
}
