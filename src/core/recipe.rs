//! MK-014: Recipe definition and the all-permutations driver.
//!
//! A recipe is built once (parameters, then ordered steps), checked with
//! [`Recipe::validate`], and run once per permutation of its parameters.
//! Each permutation gets a fresh context and its own teardown stack; one
//! failing permutation never stops the next.

use super::action::Action;
use super::error::EngineError;
use super::parameter::ParameterStream;
use super::permutation;
use super::runner::{PermutationOutcome, RecipeRunner};
use super::step::Step;
use crate::progress::{EventBus, ProgressEvent};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A named parameter set plus an ordered list of steps.
#[derive(Debug)]
pub struct Recipe {
    name: String,
    parameters: IndexMap<String, ParameterStream>,
    steps: Vec<Step>,
}

/// Totals for a full recipe run.
#[derive(Debug)]
pub struct RunSummary {
    pub permutations: usize,
    pub failed: usize,
    pub outcomes: Vec<PermutationOutcome>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

impl Recipe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: IndexMap::new(),
            steps: Vec::new(),
        }
    }

    /// Declare a parameter. Redeclaring a name replaces its stream in place.
    pub fn parameter(mut self, name: impl Into<String>, stream: ParameterStream) -> Self {
        self.add_parameter(name, stream);
        self
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, stream: ParameterStream) {
        self.parameters.insert(name.into(), stream);
    }

    /// Append a step whose actions run in parallel.
    pub fn step(mut self, name: impl Into<String>, actions: Vec<Arc<dyn Action>>) -> Self {
        self.add_step(name, actions);
        self
    }

    /// Append a step holding a single action.
    pub fn step_one(self, name: impl Into<String>, action: impl Action + 'static) -> Self {
        self.step(name, vec![Arc::new(action)])
    }

    pub fn add_step(&mut self, name: impl Into<String>, actions: Vec<Arc<dyn Action>>) {
        let index = self.steps.len();
        self.steps.push(Step::new(index, name, actions));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Check every declared input against the names available at its step.
    /// Returns a list of errors (empty = valid).
    pub fn validate(&self) -> Vec<EngineError> {
        let mut errors = Vec::new();
        let mut available: HashSet<String> = self.parameters.keys().cloned().collect();

        for step in &self.steps {
            if step.actions().is_empty() {
                errors.push(EngineError::Recipe(format!(
                    "step '{}' has no actions",
                    step.name()
                )));
            }

            for action in step.actions() {
                let missing: Vec<String> = action
                    .inputs()
                    .required()
                    .iter()
                    .filter(|n| !available.contains(*n))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    errors.push(EngineError::Binding {
                        action: action.name().to_string(),
                        missing,
                    });
                }
            }

            // Siblings only see what earlier steps produced.
            let mut produced = HashSet::new();
            for key in step.actions().iter().flat_map(|a| a.outputs()) {
                if !produced.insert(key.clone()) {
                    errors.push(EngineError::DuplicateResult {
                        step: step.name().to_string(),
                        key,
                    });
                }
            }
            available.extend(produced);
        }
        errors
    }

    /// Run the recipe once per permutation of its parameters.
    pub async fn run(&mut self, bus: &EventBus) -> Result<RunSummary, EngineError> {
        let mut problems = self.validate();
        match problems.len() {
            0 => {}
            1 => return Err(problems.remove(0)),
            _ => {
                let joined: Vec<String> = problems.iter().map(ToString::to_string).collect();
                return Err(EngineError::Recipe(joined.join("; ")));
            }
        }

        let started = Instant::now();
        bus.publish(ProgressEvent::RecipeStarted {
            name: self.name.clone(),
        });
        tracing::info!(recipe = %self.name, steps = self.steps.len(), "starting recipe");

        let runner = RecipeRunner::new(bus.clone());
        let mut outcomes = Vec::new();
        // Pulling a value may block on a prompt, so reporters catch up first.
        bus.flush().await;
        for (index, perm) in permutation::enumerate(&mut self.parameters).enumerate() {
            outcomes.push(runner.run(index, perm, &self.steps).await);
            bus.flush().await;
        }

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        let duration = started.elapsed();
        bus.publish(ProgressEvent::RecipeFinished {
            permutations: outcomes.len(),
            failed,
            duration,
        });
        tracing::info!(
            recipe = %self.name,
            permutations = outcomes.len(),
            failed,
            ?duration,
            "recipe finished"
        );

        Ok(RunSummary {
            permutations: outcomes.len(),
            failed,
            outcomes,
            duration,
        })
    }
}
