//! MK-019: Editor launchers. Both wait for the editor window to close.

use super::process::exec;
use crate::core::error::ActionError;
use crate::core::session::ActionSession;
use crate::core::types::{ActionOutput, Args};
use serde::Deserialize;

/// One path or several.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Paths {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl Paths {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::None => Vec::new(),
            Self::One(p) => vec![p.clone()],
            Self::Many(ps) => ps.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VsCodeArgs {
    #[serde(default)]
    path: Paths,
    #[serde(default)]
    remove_history: bool,
}

/// Command line for a new, waiting VS Code window.
pub fn vs_code_command(paths: &[String], remove_history: bool) -> Vec<String> {
    let mut program = vec!["code".to_string(), "-n".to_string(), "-w".to_string()];
    if remove_history {
        program.push("--skip-add-to-recently-opened".to_string());
    }
    program.extend(paths.iter().cloned());
    program
}

/// `editor.vs_code`
pub async fn vs_code(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let spec: VsCodeArgs = args.parse()?;
    let program = vs_code_command(&spec.path.to_vec(), spec.remove_history);
    launch(program, session).await
}

#[derive(Debug, Deserialize)]
struct ZedArgs {
    #[serde(default)]
    path: Paths,
}

/// Command line for a new, waiting Zed window.
pub fn zed_command(paths: &[String]) -> Vec<String> {
    let mut program = vec!["zed".to_string(), "--new".to_string(), "--wait".to_string()];
    program.extend(paths.iter().cloned());
    program
}

/// `editor.zed`
pub async fn zed(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let spec: ZedArgs = args.parse()?;
    launch(zed_command(&spec.path.to_vec()), session).await
}

async fn launch(program: Vec<String>, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let child = session.make_child(program[0].clone());
    let code = exec(&program, None, &child).await?;
    if code != 0 {
        child.fail(format!("exited with code {}", code));
        return Err(ActionError::Failed(format!(
            "{} exited with code {}",
            program[0], code
        )));
    }
    child.succeed("");
    session.succeed("editor closed");
    Ok(ActionOutput::None)
}
