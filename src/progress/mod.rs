//! Progress reporting: status events, tree rendering, console reporter.
//!
//! The engine only publishes. Anything that draws progress subscribes to the
//! [`EventBus`]; a slow or absent subscriber never holds up a recipe.

pub mod console;
pub mod render;

pub use console::ConsoleReporter;
pub use render::{format_duration, render_tree};

use crate::core::session::{ActionSession, SessionStatus};
use crate::core::types::Permutation;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Default number of buffered events per subscriber.
pub const DEFAULT_CAPACITY: usize = 1024;

/// What changed on a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionChange {
    Created,
    Status(SessionStatus),
    Message,
    Log(String),
}

/// Everything a reporter can observe about a run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    RecipeStarted {
        name: String,
    },
    PermutationStarted {
        index: usize,
        permutation: Permutation,
    },
    Session {
        session: ActionSession,
        change: SessionChange,
    },
    PermutationFinished {
        index: usize,
        duration: Duration,
        errors: Vec<String>,
    },
    RecipeFinished {
        permutations: usize,
        failed: usize,
        duration: Duration,
    },
    /// Subscribers answer on `ack` once everything before it is written out.
    Flush {
        ack: mpsc::Sender<()>,
    },
}

/// Fire-and-forget fan-out of progress events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// A bus nobody listens to.
    pub fn detached() -> Self {
        Self::new(1)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Publish without waiting; dropped silently when nobody subscribes.
    pub fn publish(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Wait until every current subscriber has handled all events published
    /// so far. Returns at once when nobody subscribes.
    ///
    /// Ends early if a subscriber drops or skips the request, since its copy
    /// of the ack sender is dropped with it.
    pub async fn flush(&self) {
        let expected = self.subscriber_count();
        if expected == 0 {
            return;
        }
        let (ack, mut acks) = mpsc::channel(expected);
        self.publish(ProgressEvent::Flush { ack });
        for _ in 0..expected {
            if acks.recv().await.is_none() {
                break;
            }
        }
    }
}
