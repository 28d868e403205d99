//! MK-003: Lazy cross-product of parameter streams.
//!
//! Odometer enumeration: the first-declared parameter is the outermost
//! wheel. Only the current value of each axis is held; advancing an outer
//! axis re-opens every inner one.

use super::error::EngineError;
use super::parameter::{ParameterStream, Traversal};
use super::types::{Permutation, Value};
use indexmap::IndexMap;

/// Enumerate every permutation of `streams`, lazily.
///
/// With no streams there is exactly one, empty, permutation. If an axis has
/// nothing to offer when it is (re)opened, enumeration ends there.
pub fn enumerate(streams: &mut IndexMap<String, ParameterStream>) -> Permutations<'_> {
    let axes = streams.iter_mut().map(|(k, v)| (k.as_str(), v)).collect();
    Permutations {
        axes,
        traversals: Vec::new(),
        current: Vec::new(),
        started: false,
        done: false,
        stopped: None,
    }
}

/// Iterator returned by [`enumerate`].
pub struct Permutations<'a> {
    axes: Vec<(&'a str, &'a mut ParameterStream)>,
    traversals: Vec<Traversal>,
    current: Vec<Value>,
    started: bool,
    done: bool,
    stopped: Option<EngineError>,
}

impl Permutations<'_> {
    /// Why enumeration stopped early, if it did.
    pub fn exhausted(&self) -> Option<&EngineError> {
        self.stopped.as_ref()
    }

    fn emit(&self) -> Permutation {
        Permutation::new(
            self.axes
                .iter()
                .zip(&self.current)
                .map(|((name, _), value)| (name.to_string(), value.clone()))
                .collect(),
        )
    }

    fn stop(&mut self, axis: usize) {
        let err = EngineError::ExhaustedParameter {
            name: self.axes[axis].0.to_string(),
        };
        tracing::debug!(error = %err, "ending permutation enumeration");
        self.stopped = Some(err);
        self.done = true;
    }

    /// Open axes `from..` afresh and take their first values.
    fn reset_from(&mut self, from: usize) -> bool {
        self.traversals.truncate(from);
        self.current.truncate(from);
        for axis in from..self.axes.len() {
            let stream = &mut self.axes[axis].1;
            let mut traversal = stream.open();
            match stream.pull(&mut traversal) {
                Some(value) => {
                    self.traversals.push(traversal);
                    self.current.push(value);
                }
                None => {
                    self.stop(axis);
                    return false;
                }
            }
        }
        true
    }
}

impl Iterator for Permutations<'_> {
    type Item = Permutation;

    fn next(&mut self) -> Option<Permutation> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            if self.axes.is_empty() {
                self.done = true;
                return Some(Permutation::default());
            }
            return self.reset_from(0).then(|| self.emit());
        }

        let mut axis = self.axes.len();
        while axis > 0 {
            axis -= 1;
            let stream = &mut self.axes[axis].1;
            if let Some(value) = stream.pull(&mut self.traversals[axis]) {
                self.current[axis] = value;
                return self.reset_from(axis + 1).then(|| self.emit());
            }
        }
        self.done = true;
        None
    }
}
