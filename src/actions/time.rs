//! MK-022: Waiting.

use crate::core::error::ActionError;
use crate::core::session::ActionSession;
use crate::core::types::{ActionOutput, Args};
use std::time::Duration;
use tokio::time::Instant;

/// `time.sleep { duration }`: seconds, fractional allowed. The session
/// message counts down once a second.
pub async fn sleep(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let secs: f64 = args.require("duration")?;
    let invalid = || {
        ActionError::InvalidArgs(format!(
            "duration must be a non-negative number of seconds, got {}",
            secs
        ))
    };
    let wait = Duration::try_from_secs_f64(secs).map_err(|_| invalid())?;
    let deadline = Instant::now().checked_add(wait).ok_or_else(invalid)?;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        session.running(format!("{}s remaining", remaining.as_secs_f64().ceil()));
        tokio::time::sleep(remaining.min(Duration::from_secs(1))).await;
    }
    session.succeed(format!("waited {}s", secs));
    Ok(ActionOutput::None)
}
