//! MK-008: Recipe runner: one permutation, start to finish.
//!
//! Steps run strictly in order. Every hook a step registered goes on a single
//! per-permutation stack, which is unwound in reverse once the steps are done
//! or one of them failed. Unwinding is sequential and best-effort.

use super::error::{panic_message, EngineError};
use super::session::TeardownHook;
use super::step::Step;
use super::types::{Context, Permutation};
use crate::progress::{EventBus, ProgressEvent};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

/// Result of running one permutation.
#[derive(Debug)]
pub struct PermutationOutcome {
    pub index: usize,
    pub permutation: Permutation,
    /// Parameters plus every result merged by the steps that succeeded.
    pub context: Context,
    /// Step failure (at most one) followed by teardown failures.
    pub errors: Vec<EngineError>,
    pub steps_completed: usize,
    pub hooks_run: usize,
    pub duration: Duration,
}

impl PermutationOutcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Drives single permutations through a list of steps.
#[derive(Debug, Clone)]
pub struct RecipeRunner {
    bus: EventBus,
}

impl RecipeRunner {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Run `steps` for one permutation and unwind its teardown stack.
    pub async fn run(&self, index: usize, permutation: Permutation, steps: &[Step]) -> PermutationOutcome {
        let started = Instant::now();
        self.bus.publish(ProgressEvent::PermutationStarted {
            index,
            permutation: permutation.clone(),
        });
        tracing::info!(index, permutation = %permutation, "running permutation");

        let mut results = Context::new();
        let mut stack: Vec<TeardownHook> = Vec::new();
        let mut errors = Vec::new();
        let mut steps_completed = 0;

        for step in steps {
            let context = permutation.with_results(&results);
            let output = step.run(&context, &self.bus).await;
            stack.extend(output.hooks);
            match output.result {
                Ok(step_results) => {
                    results.extend(step_results);
                    steps_completed += 1;
                }
                Err(e) => {
                    tracing::warn!(step = %step.name(), error = %e, "step failed, skipping the rest");
                    errors.push(e);
                    break;
                }
            }
        }

        let hooks_run = stack.len();
        errors.extend(unwind(stack).await);

        let duration = started.elapsed();
        self.bus.publish(ProgressEvent::PermutationFinished {
            index,
            duration,
            errors: errors.iter().map(ToString::to_string).collect(),
        });
        if errors.is_empty() {
            tracing::info!(index, ?duration, "permutation succeeded");
        } else {
            tracing::info!(index, ?duration, errors = errors.len(), "permutation failed");
        }

        PermutationOutcome {
            index,
            context: permutation.with_results(&results),
            permutation,
            errors,
            steps_completed,
            hooks_run,
            duration,
        }
    }
}

/// Pop and run every hook, newest first. Failures are collected, not fatal.
pub async fn unwind(mut stack: Vec<TeardownHook>) -> Vec<EngineError> {
    let mut errors = Vec::new();
    while let Some(hook) = stack.pop() {
        let owner = hook.owner().to_string();
        tracing::debug!(owner = %owner, seq = hook.seq(), "running teardown hook");
        let message = match AssertUnwindSafe(hook.run()).catch_unwind().await {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        tracing::warn!(owner = %owner, error = %message, "teardown failed");
        errors.push(EngineError::Teardown { owner, message });
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::{action_fn, named, Action};
    use crate::core::error::ActionError;
    use crate::core::session::ActionSession;
    use crate::core::types::{ActionOutput, Inputs};
    use indexmap::IndexMap;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn act(log: &Log, label: &'static str, fail: bool) -> Arc<dyn Action> {
        let log = Arc::clone(log);
        Arc::new(action_fn(label, Inputs::none(), move |_, session: ActionSession| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!("run {}", label));
                let hook_log = Arc::clone(&log);
                session.add_teardown_hook(move || async move {
                    hook_log.lock().unwrap().push(format!("undo {}", label));
                    Ok(())
                });
                if fail {
                    Err(ActionError::Failed(format!("{} broke", label)))
                } else {
                    Ok(ActionOutput::None)
                }
            }
        }))
    }

    fn perm(pairs: &[(&str, i64)]) -> Permutation {
        Permutation::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), json!(v)))
                .collect::<IndexMap<_, _>>(),
        )
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_mk008_hooks_unwind_in_reverse_across_steps() {
        let log: Log = Arc::default();
        let steps = vec![
            Step::new(0, "one", vec![act(&log, "A", false)]),
            Step::new(1, "two", vec![act(&log, "B", false)]),
            Step::new(2, "three", vec![act(&log, "C", false)]),
        ];
        let out = RecipeRunner::new(EventBus::detached())
            .run(0, Permutation::default(), &steps)
            .await;
        assert!(out.is_success());
        assert_eq!(out.steps_completed, 3);
        assert_eq!(out.hooks_run, 3);
        assert_eq!(
            entries(&log),
            vec!["run A", "run B", "run C", "undo C", "undo B", "undo A"]
        );
    }

    #[tokio::test]
    async fn test_mk008_failed_step_stops_later_steps_but_unwinds() {
        let log: Log = Arc::default();
        let steps = vec![
            Step::new(0, "one", vec![act(&log, "A", false)]),
            Step::new(1, "two", vec![act(&log, "B", true)]),
            Step::new(2, "three", vec![act(&log, "C", false)]),
        ];
        let out = RecipeRunner::new(EventBus::detached())
            .run(0, Permutation::default(), &steps)
            .await;
        assert!(!out.is_success());
        assert_eq!(out.steps_completed, 1);
        assert_eq!(out.errors.len(), 1);
        assert_eq!(entries(&log), vec!["run A", "run B", "undo B", "undo A"]);
    }

    #[tokio::test]
    async fn test_mk008_teardown_failure_does_not_stop_unwind() {
        let log: Log = Arc::default();
        let hook_log = Arc::clone(&log);
        let flaky = action_fn("flaky", Inputs::none(), move |_, session: ActionSession| {
            let log = Arc::clone(&hook_log);
            async move {
                session.add_teardown_hook(move || async move {
                    log.lock().unwrap().push("undo flaky".to_string());
                    Err(ActionError::Failed("rm: busy".to_string()))
                });
                session.add_teardown_hook(|| async {
                    if true {
                        panic!("hook exploded");
                    }
                    Ok(())
                });
                Ok(ActionOutput::None)
            }
        });
        let steps = vec![
            Step::new(0, "one", vec![act(&log, "A", false)]),
            Step::new(1, "two", vec![Arc::new(flaky) as Arc<dyn Action>]),
        ];
        let out = RecipeRunner::new(EventBus::detached())
            .run(0, Permutation::default(), &steps)
            .await;
        assert_eq!(out.steps_completed, 2);
        assert_eq!(out.hooks_run, 3);
        assert_eq!(entries(&log), vec!["run A", "undo flaky", "undo A"]);
        let messages: Vec<String> = out.errors.iter().map(ToString::to_string).collect();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("panicked: hook exploded"));
        assert!(messages[1].contains("rm: busy"));
    }

    #[tokio::test]
    async fn test_mk008_successful_sibling_still_torn_down() {
        let log: Log = Arc::default();
        let steps = vec![Step::new(
            0,
            "setup",
            vec![act(&log, "X", false), act(&log, "Y", true)],
        )];
        let out = RecipeRunner::new(EventBus::detached())
            .run(0, Permutation::default(), &steps)
            .await;
        assert!(!out.is_success());
        let undone: Vec<String> = entries(&log)
            .into_iter()
            .filter(|e| e.starts_with("undo"))
            .collect();
        assert_eq!(undone, vec!["undo Y", "undo X"]);
    }

    #[tokio::test]
    async fn test_mk008_context_threads_between_steps() {
        let setup = named(
            "dir",
            action_fn("temp", Inputs::none(), |_, _| async {
                Ok(ActionOutput::value("/tmp/x"))
            }),
        );
        let info = action_fn("info", Inputs::none(), |_, _| async {
            Ok(ActionOutput::value("unused"))
        });
        let seen: Arc<Mutex<Option<Context>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let finish = action_fn("finish", Inputs::All, move |args, _| {
            let sink = Arc::clone(&sink);
            async move {
                *sink.lock().unwrap() = Some(args.into_inner());
                Ok(ActionOutput::named([("n", 99)]))
            }
        });
        let steps = vec![
            Step::new(0, "setup", vec![Arc::new(setup), Arc::new(info)]),
            Step::new(1, "finish", vec![Arc::new(finish)]),
        ];
        let out = RecipeRunner::new(EventBus::detached())
            .run(0, perm(&[("n", 1)]), &steps)
            .await;
        assert!(out.is_success());
        let seen = seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen["n"], json!(1));
        assert_eq!(seen["dir"], json!("/tmp/x"));
        // last write wins
        assert_eq!(out.context["n"], json!(99));
    }

    #[tokio::test]
    async fn test_mk008_publishes_permutation_events() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let out = RecipeRunner::new(bus.clone())
            .run(3, perm(&[("n", 2)]), &[])
            .await;
        assert!(out.is_success());
        let mut started = false;
        let mut finished = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                ProgressEvent::PermutationStarted { index, permutation } => {
                    assert_eq!(index, 3);
                    assert_eq!(permutation.get("n"), Some(&json!(2)));
                    started = true;
                }
                ProgressEvent::PermutationFinished { index, errors, .. } => {
                    assert_eq!(index, 3);
                    assert!(errors.is_empty());
                    finished = true;
                }
                _ => {}
            }
        }
        assert!(started && finished);
    }
}
