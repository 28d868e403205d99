//! MK-016: Running external programs.

use crate::core::error::ActionError;
use crate::core::session::ActionSession;
use crate::core::types::{ActionOutput, Args};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

/// Run `program` to completion, streaming stdout and stderr into the session
/// log. Returns the exit code, or -1 if the process was killed by a signal.
pub async fn exec(
    program: &[String],
    cwd: Option<&Path>,
    session: &ActionSession,
) -> Result<i32, ActionError> {
    let (cmd, rest) = program
        .split_first()
        .ok_or_else(|| ActionError::InvalidArgs("empty command".to_string()))?;
    session.running(program.join(" "));
    tracing::debug!(command = %program.join(" "), "spawning process");

    let mut command = Command::new(cmd);
    command
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    let mut child = command
        .spawn()
        .map_err(|e| ActionError::Failed(format!("failed to spawn {}: {}", cmd, e)))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (_, _, status) = tokio::join!(
        pump(stdout, session),
        pump(stderr, session),
        child.wait()
    );
    Ok(status?.code().unwrap_or(-1))
}

async fn pump<R: AsyncRead + Unpin>(reader: Option<R>, session: &ActionSession) {
    let Some(reader) = reader else { return };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        session.log(line);
    }
}

#[derive(Debug, Deserialize)]
struct RunArgs {
    args: Vec<String>,
    #[serde(default)]
    allow_exit_failure: bool,
    #[serde(default)]
    cwd: Option<PathBuf>,
}

/// `process.run`: run to completion; a non-zero exit fails unless allowed.
pub async fn run(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let spec: RunArgs = args.parse()?;
    let code = exec(&spec.args, spec.cwd.as_deref(), &session).await?;
    if code != 0 && !spec.allow_exit_failure {
        return Err(ActionError::Failed(format!("process exited with code {}", code)));
    }
    session.succeed("");
    Ok(ActionOutput::value(code))
}

fn default_exit_timeout() -> f64 {
    2.0
}

#[derive(Debug, Deserialize)]
struct SpawnArgs {
    args: Vec<String>,
    #[serde(default = "default_exit_timeout")]
    exit_timeout: f64,
}

/// `process.spawn`: start a program and leave it running until teardown.
pub async fn spawn(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let spec: SpawnArgs = args.parse()?;
    let (cmd, rest) = spec
        .args
        .split_first()
        .ok_or_else(|| ActionError::InvalidArgs("empty command".to_string()))?;
    if !spec.exit_timeout.is_finite() || spec.exit_timeout < 0.0 {
        return Err(ActionError::InvalidArgs(format!(
            "exit_timeout must be a non-negative number of seconds, got {}",
            spec.exit_timeout
        )));
    }
    let child = Command::new(cmd)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ActionError::Failed(format!("failed to spawn {}: {}", cmd, e)))?;

    let timeout = Duration::from_secs_f64(spec.exit_timeout);
    session.add_teardown_hook(move || stop(child, timeout));
    session.succeed(spec.args.join(" "));
    Ok(ActionOutput::None)
}

/// Interrupt a background process, then kill it if it outlives `timeout`.
pub async fn stop(mut child: Child, timeout: Duration) -> Result<(), ActionError> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }
    interrupt(child.id());
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            status?;
            Ok(())
        }
        Err(_) => {
            tracing::warn!(pid = ?child.id(), "process did not exit after interrupt, killing");
            child.kill().await?;
            Ok(())
        }
    }
}

#[cfg(unix)]
fn interrupt(pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGINT) {
        tracing::debug!(pid, error = %e, "could not send interrupt");
    }
}

#[cfg(not(unix))]
fn interrupt(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: serde_json::Value) -> Args {
        Args::new(
            value
                .as_object()
                .unwrap()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_mk016_exec_logs_output() {
        let session = ActionSession::new("echo");
        let program = vec!["sh".to_string(), "-c".to_string(), "echo out; echo err >&2".to_string()];
        let code = exec(&program, None, &session).await.unwrap();
        assert_eq!(code, 0);
        let mut log = session.log_lines();
        log.sort();
        assert_eq!(log, vec!["err", "out"]);
        assert_eq!(session.message().as_deref(), Some("sh -c echo out; echo err >&2"));
    }

    #[tokio::test]
    async fn test_mk016_run_returns_exit_code() {
        let session = ActionSession::new("true");
        let out = run(args(json!({"args": ["true"]})), session.clone())
            .await
            .unwrap();
        assert_eq!(out, ActionOutput::value(0));
        assert!(session.is_resolved());
    }

    #[tokio::test]
    async fn test_mk016_run_nonzero_fails() {
        let err = run(args(json!({"args": ["sh", "-c", "exit 3"]})), ActionSession::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "process exited with code 3");
    }

    #[tokio::test]
    async fn test_mk016_run_allow_exit_failure() {
        let out = run(
            args(json!({"args": ["false"], "allow_exit_failure": true})),
            ActionSession::new("x"),
        )
        .await
        .unwrap();
        assert_eq!(out, ActionOutput::value(1));
    }

    #[tokio::test]
    async fn test_mk016_run_in_cwd() {
        let tmp = tempfile::tempdir().unwrap();
        let session = ActionSession::new("pwd");
        run(
            args(json!({"args": ["pwd"], "cwd": tmp.path()})),
            session.clone(),
        )
        .await
        .unwrap();
        let reported = std::fs::canonicalize(&session.log_lines()[0]).unwrap();
        assert_eq!(reported, std::fs::canonicalize(tmp.path()).unwrap());
    }

    #[tokio::test]
    async fn test_mk016_missing_program() {
        let err = exec(
            &["markten-no-such-program".to_string()],
            None,
            &ActionSession::new("x"),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
        assert!(exec(&[], None, &ActionSession::new("x")).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_mk016_spawn_stopped_at_teardown() {
        let session = ActionSession::new("sleeper");
        spawn(
            args(json!({"args": ["sleep", "30"], "exit_timeout": 1.0})),
            session.clone(),
        )
        .await
        .unwrap();
        assert_eq!(session.pending_hooks(), 1);
        let started = std::time::Instant::now();
        for hook in session.take_teardown_hooks() {
            hook.run().await.unwrap();
        }
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_mk016_stop_sends_interrupt_before_timeout() {
        let child = Command::new("sh")
            .args(["-c", "trap 'exit 7' INT; while :; do sleep 0.1; done"])
            .spawn()
            .unwrap();
        // Give the shell time to install its trap.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let started = std::time::Instant::now();
        stop(child, Duration::from_secs(20)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_mk016_spawn_rejects_bad_timeout() {
        let err = spawn(
            args(json!({"args": ["true"], "exit_timeout": -1.0})),
            ActionSession::new("x"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ActionError::InvalidArgs(_)));
    }
}
