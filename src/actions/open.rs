//! MK-020: Hand a file or URL to the desktop's default handler.

use super::process::exec;
use crate::core::error::ActionError;
use crate::core::session::ActionSession;
use crate::core::types::{ActionOutput, Args};

/// Platform opener command for `target`.
pub fn opener_command(target: &str) -> Vec<String> {
    let mut program: Vec<String> = if cfg!(target_os = "macos") {
        vec!["open".into()]
    } else if cfg!(windows) {
        vec!["cmd".into(), "/C".into(), "start".into(), String::new()]
    } else {
        vec!["xdg-open".into()]
    };
    program.push(target.to_string());
    program
}

/// Open `target` and wait for the opener to hand it off.
pub async fn open_target(target: &str, session: &ActionSession) -> Result<(), ActionError> {
    let code = exec(&opener_command(target), None, session).await?;
    if code != 0 {
        return Err(ActionError::Failed(format!(
            "could not open {} (exit code {})",
            target, code
        )));
    }
    Ok(())
}

/// `open`
pub async fn open(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let target = args.str("target")?;
    open_target(&target, &session).await?;
    session.succeed(format!("opened {}", target));
    Ok(ActionOutput::None)
}

/// `webbrowser.open`
pub async fn webbrowser(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let url = args.str("url")?;
    open_target(&url, &session).await?;
    session.succeed(format!("opened {}", url));
    Ok(ActionOutput::None)
}
