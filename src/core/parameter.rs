//! MK-002: Parameter streams: lazy, possibly interactive, possibly replayable.
//!
//! A stream is either `Cached` (a realized sequence replayed on every
//! traversal) or `Live` (a source plus the policy that decides what happens
//! when it is traversed again):
//!
//! - `Reuse`: the first full traversal is recorded; once the source ends the
//!   stream turns into `Cached` and replays exactly those values.
//! - `Regenerate`: every traversal asks the source again. Interactive sources
//!   carry on from where earlier input stopped.

use super::types::Value;
use std::fmt;

/// Boxed iterator produced by one traversal of a source.
pub type ValueIter = Box<dyn Iterator<Item = Value> + Send>;

/// Something that can produce a sequence of values, once per traversal.
pub trait ValueSource: Send {
    /// Begin a traversal.
    fn traverse(&mut self) -> ValueIter;
}

impl<F> ValueSource for F
where
    F: FnMut() -> ValueIter + Send,
{
    fn traverse(&mut self) -> ValueIter {
        self()
    }
}

/// What a live stream does when it is traversed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReusePolicy {
    Regenerate,
    Reuse,
}

/// Internal state of a stream.
pub enum StreamState {
    Cached(Vec<Value>),
    Live {
        source: Box<dyn ValueSource>,
        policy: ReusePolicy,
        recorded: Vec<Value>,
    },
}

/// Position within one traversal of a stream.
pub enum Traversal {
    Replay(usize),
    Live(ValueIter),
}

/// A lazily evaluated sequence of values for one parameter.
pub struct ParameterStream {
    state: StreamState,
}

impl fmt::Debug for ParameterStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            StreamState::Cached(values) => f.debug_tuple("Cached").field(values).finish(),
            StreamState::Live {
                policy, recorded, ..
            } => f
                .debug_struct("Live")
                .field("policy", policy)
                .field("recorded", &recorded.len())
                .finish_non_exhaustive(),
        }
    }
}

impl ParameterStream {
    /// A fixed list of values.
    pub fn values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            state: StreamState::Cached(values.into_iter().map(Into::into).collect()),
        }
    }

    /// A source whose first full traversal is replayed from then on.
    pub fn reuse(source: impl ValueSource + 'static) -> Self {
        Self::live(source, ReusePolicy::Reuse)
    }

    /// A source asked again on every traversal.
    pub fn regenerate(source: impl ValueSource + 'static) -> Self {
        Self::live(source, ReusePolicy::Regenerate)
    }

    pub fn live(source: impl ValueSource + 'static, policy: ReusePolicy) -> Self {
        Self {
            state: StreamState::Live {
                source: Box::new(source),
                policy,
                recorded: Vec::new(),
            },
        }
    }

    /// Change the replay policy of a live stream. Cached streams are unaffected.
    pub fn with_policy(mut self, new_policy: ReusePolicy) -> Self {
        if let StreamState::Live { policy, .. } = &mut self.state {
            *policy = new_policy;
        }
        self
    }

    /// Replay policy; cached streams always reuse.
    pub fn policy(&self) -> ReusePolicy {
        match &self.state {
            StreamState::Cached(_) => ReusePolicy::Reuse,
            StreamState::Live { policy, .. } => *policy,
        }
    }

    /// The realized values, once the stream is cached.
    pub fn cached(&self) -> Option<&[Value]> {
        match &self.state {
            StreamState::Cached(values) => Some(values),
            StreamState::Live { .. } => None,
        }
    }

    /// Start a traversal.
    pub fn open(&mut self) -> Traversal {
        match &mut self.state {
            StreamState::Cached(_) => Traversal::Replay(0),
            StreamState::Live {
                source, recorded, ..
            } => {
                // An abandoned earlier recording is discarded.
                recorded.clear();
                Traversal::Live(source.traverse())
            }
        }
    }

    /// Pull the next value of a traversal.
    pub fn pull(&mut self, traversal: &mut Traversal) -> Option<Value> {
        match traversal {
            Traversal::Replay(index) => {
                let value = match &self.state {
                    StreamState::Cached(values) => values.get(*index).cloned(),
                    StreamState::Live { .. } => None,
                };
                *index += 1;
                value
            }
            Traversal::Live(iter) => {
                let next = iter.next();
                if let StreamState::Live {
                    policy: ReusePolicy::Reuse,
                    recorded,
                    ..
                } = &mut self.state
                {
                    match &next {
                        Some(value) => recorded.push(value.clone()),
                        None => {
                            let values = std::mem::take(recorded);
                            self.state = StreamState::Cached(values);
                        }
                    }
                }
                next
            }
        }
    }

    /// Drain one full traversal.
    pub fn collect_values(&mut self) -> Vec<Value> {
        let mut traversal = self.open();
        let mut out = Vec::new();
        while let Some(v) = self.pull(&mut traversal) {
            out.push(v);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_source(calls: Arc<AtomicUsize>) -> impl ValueSource {
        move || -> ValueIter {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Box::new((0..3).map(move |i| json!(format!("t{}-{}", n, i))))
        }
    }

    #[test]
    fn test_mk002_values_replay() {
        let mut s = ParameterStream::values(["a", "b", "c"]);
        assert_eq!(s.collect_values(), vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(s.collect_values(), vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(s.policy(), ReusePolicy::Reuse);
    }

    #[test]
    fn test_mk002_reuse_calls_source_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut s = ParameterStream::reuse(counting_source(Arc::clone(&calls)));
        assert!(s.cached().is_none());
        let first = s.collect_values();
        let second = s.collect_values();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(s.cached().unwrap().len(), 3);
    }

    #[test]
    fn test_mk002_regenerate_calls_source_each_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut s = ParameterStream::regenerate(counting_source(Arc::clone(&calls)));
        let first = s.collect_values();
        let second = s.collect_values();
        assert_ne!(first, second);
        assert_eq!(second[0], json!("t1-0"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(s.cached().is_none());
    }

    #[test]
    fn test_mk002_abandoned_reuse_recording_restarts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut s = ParameterStream::reuse(counting_source(Arc::clone(&calls)));
        let mut t = s.open();
        assert_eq!(s.pull(&mut t), Some(json!("t0-0")));
        // abandon after one value
        let values = s.collect_values();
        assert_eq!(values, vec![json!("t1-0"), json!("t1-1"), json!("t1-2")]);
        assert_eq!(s.cached().unwrap(), values.as_slice());
    }
}
