//! MK-017: Filesystem actions.

use crate::core::error::ActionError;
use crate::core::session::ActionSession;
use crate::core::types::{ActionOutput, Args};
use serde::Deserialize;
use std::path::PathBuf;

/// Create a `markten-` prefixed temporary directory.
///
/// With `remove`, a teardown hook deletes it again.
pub fn make_temp_dir(session: &ActionSession, remove: bool) -> Result<PathBuf, ActionError> {
    let dir = tempfile::Builder::new()
        .prefix("markten-")
        .tempdir()
        .map_err(|e| ActionError::Failed(format!("cannot create temporary directory: {}", e)))?;
    let path = dir.keep();
    if remove {
        let target = path.clone();
        session.add_teardown_hook(move || async move {
            tracing::debug!(dir = %target.display(), "removing temporary directory");
            match tokio::fs::remove_dir_all(&target).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(ActionError::Failed(format!(
                    "cannot remove {}: {}",
                    target.display(),
                    e
                ))),
            }
        });
    }
    Ok(path)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct TempDirArgs {
    #[serde(default = "default_true")]
    remove: bool,
}

/// `fs.temp_dir`: returns the path of a fresh temporary directory.
pub async fn temp_dir(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let spec: TempDirArgs = args.parse()?;
    session.running("creating temporary directory");
    let path = make_temp_dir(&session, spec.remove)?;
    let shown = path.display().to_string();
    session.succeed(shown.clone());
    Ok(ActionOutput::value(shown))
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: PathBuf,
    text: String,
    #[serde(default)]
    overwrite: bool,
}

/// `fs.write_file`: refuses to replace an existing file unless `overwrite`.
pub async fn write_file(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let spec: WriteArgs = args.parse()?;
    let exists = tokio::fs::try_exists(&spec.path).await?;
    if exists && !spec.overwrite {
        return Err(ActionError::Failed(format!(
            "{} already exists (set overwrite: true to replace it)",
            spec.path.display()
        )));
    }
    session.running(format!("writing {}", spec.path.display()));
    tokio::fs::write(&spec.path, spec.text.as_bytes()).await?;
    session.succeed(format!("wrote {} bytes", spec.text.len()));
    Ok(ActionOutput::value(spec.path.display().to_string()))
}

#[derive(Debug, Deserialize)]
struct ReadArgs {
    path: PathBuf,
}

/// `fs.read_file`: the file's contents as text.
pub async fn read_file(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let spec: ReadArgs = args.parse()?;
    session.running(format!("reading {}", spec.path.display()));
    let text = tokio::fs::read_to_string(&spec.path)
        .await
        .map_err(|e| ActionError::Failed(format!("cannot read {}: {}", spec.path.display(), e)))?;
    Ok(ActionOutput::value(text))
}
