//! MK-011: Console reporter: prints run progress from the event bus.

use super::render::{format_duration, render_brief, render_tree, PARTIAL_LOG_LINES};
use super::{EventBus, ProgressEvent, SessionChange};
use crate::core::session::SessionStatus;
use crate::core::types::display_value;
use std::io::Write;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Writes a line-oriented account of a recipe run.
///
/// Runs as its own task and stops after `RecipeFinished` or when the bus
/// closes, handing the writer back.
pub struct ConsoleReporter<W> {
    out: W,
    log_lines: usize,
}

impl ConsoleReporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send + 'static> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            log_lines: PARTIAL_LOG_LINES,
        }
    }

    /// Log lines to show for sessions that did not fail.
    pub fn with_log_lines(mut self, log_lines: usize) -> Self {
        self.log_lines = log_lines;
        self
    }

    /// Subscribe now and report in the background.
    pub fn spawn(self, bus: &EventBus) -> JoinHandle<W> {
        let rx = bus.subscribe();
        tokio::spawn(self.run(rx))
    }

    pub async fn run(mut self, mut rx: broadcast::Receiver<ProgressEvent>) -> W {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let done = matches!(event, ProgressEvent::RecipeFinished { .. });
                    if let Err(e) = self.handle(event) {
                        tracing::debug!(error = %e, "progress output failed");
                    }
                    if done {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "progress reporter lagging");
                }
                Err(RecvError::Closed) => break,
            }
        }
        let _ = self.out.flush();
        self.out
    }

    fn handle(&mut self, event: ProgressEvent) -> std::io::Result<()> {
        match event {
            ProgressEvent::RecipeStarted { name } => {
                writeln!(self.out, "markten v{}", env!("CARGO_PKG_VERSION"))?;
                writeln!(self.out, "Recipe: {}", name)?;
            }
            ProgressEvent::PermutationStarted { permutation, .. } => {
                writeln!(self.out)?;
                if permutation.is_empty() {
                    writeln!(self.out, "Running recipe (no parameters)")?;
                } else {
                    writeln!(self.out, "Running recipe with given parameters:")?;
                    for (name, value) in permutation.iter() {
                        writeln!(self.out, "  {} = {}", name, display_value(value))?;
                    }
                }
                writeln!(self.out)?;
            }
            ProgressEvent::Session { session, change } => match change {
                SessionChange::Created if session.depth() == 0 => {
                    writeln!(self.out, "{}", session.name())?;
                }
                SessionChange::Status(SessionStatus::Failure) if session.depth() == 0 => {
                    writeln!(self.out, "{}", render_tree(&session.snapshot(), self.log_lines))?;
                }
                SessionChange::Status(status) if status.is_terminal() && session.depth() == 1 => {
                    writeln!(self.out, "  {}", render_brief(&session.snapshot()))?;
                }
                SessionChange::Log(line) => {
                    tracing::trace!(session = %session.name(), "{}", line);
                }
                _ => {}
            },
            ProgressEvent::PermutationFinished {
                duration, errors, ..
            } => {
                if !errors.is_empty() {
                    writeln!(self.out, "Error while running this permutation of recipe")?;
                    for e in &errors {
                        writeln!(self.out, "  {}", e)?;
                    }
                }
                writeln!(self.out, "Permutation complete in {}", format_duration(duration))?;
            }
            ProgressEvent::RecipeFinished {
                permutations,
                failed,
                duration,
            } => {
                writeln!(self.out)?;
                writeln!(
                    self.out,
                    "All permutations complete in {} ({} run, {} failed)",
                    format_duration(duration),
                    permutations,
                    failed
                )?;
            }
            ProgressEvent::Flush { ack } => {
                let flushed = self.out.flush();
                let _ = ack.try_send(());
                flushed?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::ActionSession;
    use crate::core::types::Permutation;
    use indexmap::IndexMap;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_mk011_reports_a_run() {
        let bus = EventBus::new(64);
        let handle = ConsoleReporter::new(Vec::new()).spawn(&bus);

        bus.publish(ProgressEvent::RecipeStarted {
            name: "marking".to_string(),
        });
        let mut values = IndexMap::new();
        values.insert("zid".to_string(), json!("z1"));
        bus.publish(ProgressEvent::PermutationStarted {
            index: 0,
            permutation: Permutation::new(values),
        });
        let step = ActionSession::root("1. setup", &bus);
        let ok = step.make_child("clone");
        let bad = step.make_child("info");
        ok.succeed("cloned");
        bad.log("permission denied");
        bad.fail("exit 1");
        step.fail("");
        bus.publish(ProgressEvent::PermutationFinished {
            index: 0,
            duration: Duration::from_millis(5),
            errors: vec!["action 'info' failed: exit 1".to_string()],
        });
        bus.publish(ProgressEvent::RecipeFinished {
            permutations: 1,
            failed: 1,
            duration: Duration::from_millis(6),
        });

        let out = String::from_utf8(handle.await.unwrap()).unwrap();
        assert!(out.contains("Recipe: marking"));
        assert!(out.contains("  zid = z1"));
        assert!(out.contains("1. setup"));
        assert!(out.contains("  [✓] clone - cloned"));
        assert!(out.contains("  [✗] info - exit 1"));
        assert!(out.contains("permission denied"));
        assert!(out.contains("Error while running this permutation of recipe"));
        assert!(out.contains("(1 run, 1 failed)"));
    }

    #[tokio::test]
    async fn test_mk011_empty_permutation() {
        let bus = EventBus::new(8);
        let handle = ConsoleReporter::new(Vec::new()).spawn(&bus);
        bus.publish(ProgressEvent::PermutationStarted {
            index: 0,
            permutation: Permutation::default(),
        });
        bus.publish(ProgressEvent::RecipeFinished {
            permutations: 1,
            failed: 0,
            duration: Duration::ZERO,
        });
        let out = String::from_utf8(handle.await.unwrap()).unwrap();
        assert!(out.contains("Running recipe (no parameters)"));
    }
}
