//! MK-018: Git actions.

use super::fs::make_temp_dir;
use super::process::exec;
use crate::core::error::ActionError;
use crate::core::session::ActionSession;
use crate::core::types::{ActionOutput, Args};
use serde::Deserialize;
use std::path::PathBuf;

/// Remote used when `true` is given instead of a remote name.
pub const DEFAULT_REMOTE: &str = "origin";

/// `true` for the default remote, or a remote name.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RemoteTarget {
    Flag(bool),
    Name(String),
}

impl RemoteTarget {
    /// The remote to use, if any.
    pub fn remote(&self) -> Option<&str> {
        match self {
            Self::Flag(true) => Some(DEFAULT_REMOTE),
            Self::Flag(false) => None,
            Self::Name(name) => Some(name),
        }
    }
}

fn git_program<I, S>(dir: &str, args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut program = vec!["git".to_string(), "-C".to_string(), dir.to_string()];
    program.extend(args.into_iter().map(Into::into));
    program
}

/// Run one git command, failing on a non-zero exit.
async fn git(program: Vec<String>, session: &ActionSession) -> Result<(), ActionError> {
    let code = exec(&program, None, session).await?;
    if code != 0 {
        let sub = program.get(3).map(String::as_str).unwrap_or("git");
        return Err(ActionError::Failed(format!(
            "git {} exited with error code: {}",
            sub, code
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CloneArgs {
    repo: String,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    fallback_to_main: bool,
    #[serde(default)]
    dir: Option<PathBuf>,
}

/// `git.clone`: clone into `dir`, or a temporary directory removed at
/// teardown. Returns the clone path.
pub async fn clone(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let spec: CloneArgs = args.parse()?;
    let repo = spec.repo.trim();
    let branch = spec
        .branch
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty());

    let path = match spec.dir {
        Some(dir) => dir,
        None => make_temp_dir(&session, true)?,
    };
    let shown = path.display().to_string();

    let program: Vec<String> = ["git", "clone", repo, shown.as_str()]
        .into_iter()
        .map(String::from)
        .collect();
    let code = exec(&program, None, &session).await?;
    if code != 0 {
        return Err(ActionError::Failed(format!(
            "git clone exited with error code: {}",
            code
        )));
    }

    if let Some(branch) = branch {
        let remote_branch = format!("{}/{}", DEFAULT_REMOTE, branch);
        let checkout = git_program(&shown, ["checkout", "-b", branch, remote_branch.as_str()]);
        session.log(checkout.join(" "));
        let code = exec(&checkout, None, &session).await?;
        if code != 0 {
            if spec.fallback_to_main {
                session.log("Note: remaining on main branch");
            } else {
                return Err(ActionError::Failed(format!(
                    "failed to check out to '{}'",
                    branch
                )));
            }
        }
    }

    session.succeed(format!("cloned {}", repo));
    Ok(ActionOutput::value(shown))
}

#[derive(Debug, Deserialize)]
struct CheckoutArgs {
    dir: String,
    branch: String,
    #[serde(default)]
    create: bool,
    #[serde(default)]
    push_to_remote: Option<RemoteTarget>,
}

/// `git.checkout`: switch (or create and switch) branch.
pub async fn checkout(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let spec: CheckoutArgs = args.parse()?;
    let remote = spec.push_to_remote.as_ref().and_then(RemoteTarget::remote);
    if remote.is_some() && !spec.create {
        return Err(ActionError::InvalidArgs(
            "push_to_remote requires create: true".to_string(),
        ));
    }

    let mut argv = vec!["checkout"];
    if spec.create {
        argv.push("-b");
    }
    argv.push(&spec.branch);
    git(git_program(&spec.dir, argv), &session).await?;

    if let Some(remote) = remote {
        git(
            git_program(&spec.dir, ["push", "--set-upstream", remote, spec.branch.as_str()]),
            &session,
        )
        .await?;
    }

    let mut msg = format!(
        "switched to{} branch {}",
        if spec.create { " new" } else { "" },
        spec.branch
    );
    if remote.is_some() {
        msg.push_str(" and pushed to remote");
    }
    session.succeed(msg);
    Ok(ActionOutput::None)
}

#[derive(Debug, Deserialize)]
struct AddArgs {
    dir: String,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    all: bool,
}

/// `git.add`: stage the given files, or everything with `all`.
pub async fn add(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let spec: AddArgs = args.parse()?;
    if spec.all && !spec.files.is_empty() {
        return Err(ActionError::InvalidArgs(
            "files must not be given together with all: true".to_string(),
        ));
    }
    if !spec.all && spec.files.is_empty() {
        session.succeed("nothing to stage");
        return Ok(ActionOutput::None);
    }

    let mut argv = vec!["add".to_string()];
    if spec.all {
        argv.push("-A".to_string());
    } else {
        argv.push("--".to_string());
        argv.extend(spec.files.iter().cloned());
    }
    git(git_program(&spec.dir, argv), &session).await?;

    if spec.all {
        session.succeed("staged all files");
    } else {
        session.succeed(format!("staged {}", spec.files.join(", ")));
    }
    Ok(ActionOutput::None)
}

#[derive(Debug, Deserialize)]
struct CommitArgs {
    dir: String,
    message: String,
    #[serde(default)]
    all: bool,
    #[serde(default)]
    push: bool,
}

/// `git.commit`: commit staged changes, optionally pushing afterwards.
pub async fn commit(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let spec: CommitArgs = args.parse()?;
    let mut argv = vec!["commit"];
    if spec.all {
        argv.push("-a");
    }
    argv.extend(["-m", spec.message.as_str()]);
    git(git_program(&spec.dir, argv), &session).await?;
    if spec.push {
        git(git_program(&spec.dir, ["push"]), &session).await?;
    }
    session.succeed(if spec.push { "committed and pushed" } else { "committed" });
    Ok(ActionOutput::None)
}

#[derive(Debug, Deserialize)]
struct PushArgs {
    dir: String,
    #[serde(default)]
    set_upstream: Option<RemoteTarget>,
}

/// `git.push`: push the current branch.
pub async fn push(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let spec: PushArgs = args.parse()?;
    let program = match spec.set_upstream.as_ref().and_then(RemoteTarget::remote) {
        Some(remote) => git_program(&spec.dir, ["push", "--set-upstream", remote, "HEAD"]),
        None => git_program(&spec.dir, ["push"]),
    };
    git(program, &session).await?;
    session.succeed("pushed");
    Ok(ActionOutput::None)
}

#[derive(Debug, Deserialize)]
struct PullArgs {
    dir: String,
}

/// `git.pull`: pull the current branch.
pub async fn pull(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let spec: PullArgs = args.parse()?;
    git(git_program(&spec.dir, ["pull"]), &session).await?;
    session.succeed("pulled");
    Ok(ActionOutput::None)
}
