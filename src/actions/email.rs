//! MK-021: Compose an email in the user's mail client via a `mailto:` URL
//! (RFC 6068).

use super::editor::Paths;
use super::open::open_target;
use crate::core::error::ActionError;
use crate::core::session::ActionSession;
use crate::core::types::{ActionOutput, Args};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct Email {
    pub to: Paths,
    #[serde(default)]
    pub cc: Paths,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl Email {
    /// The `mailto:` URL for this message. Absent fields are left out.
    pub fn mailto_url(&self) -> String {
        let to: Vec<String> = self
            .to
            .to_vec()
            .iter()
            .map(|addr| urlencoding::encode(addr).into_owned())
            .collect();
        let mut query = Vec::new();
        let cc = self.cc.to_vec();
        if !cc.is_empty() {
            query.push(format!("cc={}", urlencoding::encode(&cc.join(","))));
        }
        if let Some(subject) = &self.subject {
            query.push(format!("subject={}", urlencoding::encode(subject)));
        }
        if let Some(body) = &self.body {
            query.push(format!("body={}", urlencoding::encode(body)));
        }

        let mut url = format!("mailto:{}", to.join(","));
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }
}

/// `email.compose`
pub async fn compose(args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
    let email: Email = args.parse()?;
    if email.to.to_vec().is_empty() {
        return Err(ActionError::InvalidArgs("no recipient given".to_string()));
    }
    session.running("opening mail client");
    open_target(&email.mailto_url(), &session).await?;
    session.succeed(format!("drafted email to {}", email.to.to_vec().join(", ")));
    Ok(ActionOutput::None)
}
