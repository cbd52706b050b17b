//! PushPlus notifier.
//!
//! Posts `{token, title, content, template: "html"}` to the PushPlus send
//! endpoint. The service answers HTTP 200 even for rejected messages, so
//! success is decided by the `code` field of the JSON reply.
//!
//! The token is looked up on every send, so a settings change takes effect
//! on the next push without rebuilding the channel.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::traits::{Notification, Notifier, NotifyError};
use crate::webhook::resolve_env_vars;

/// Supplies the PushPlus token at send time.
pub trait TokenSource: Send + Sync + fmt::Debug {
    /// Current token, `None` when none is configured.
    fn token(&self) -> Option<String>;
}

/// Delivers notifications through the PushPlus HTTP API.
#[derive(Debug)]
pub struct PushPlusNotifier {
    /// Send endpoint (env vars already resolved).
    endpoint: String,
    token: Arc<dyn TokenSource>,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct PushPlusRequest<'a> {
    token: &'a str,
    title: &'a str,
    content: &'a str,
    template: &'a str,
}

#[derive(Debug, Deserialize)]
struct PushPlusReply {
    code: i64,
    #[serde(default)]
    msg: String,
}

impl PushPlusNotifier {
    /// Create a notifier whose token is read from `source` on every send.
    ///
    /// `${VAR_NAME}` references in the endpoint are resolved here, those in
    /// the token at send time.
    pub fn with_token_source(
        endpoint: &str,
        source: Arc<dyn TokenSource>,
    ) -> Result<Self, NotifyError> {
        Ok(Self {
            endpoint: resolve_env_vars(endpoint)?,
            token: source,
            client: reqwest::Client::new(),
        })
    }

    /// The token the next send will use.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Config`] if the source has no usable token.
    pub fn current_token(&self) -> Result<String, NotifyError> {
        let raw = self.token.token().unwrap_or_default();
        let token = resolve_env_vars(raw.trim())?;
        if token.is_empty() {
            return Err(NotifyError::Config("PushPlus token is empty".to_string()));
        }
        Ok(token)
    }
}

#[async_trait::async_trait]
impl Notifier for PushPlusNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let token = self.current_token()?;
        let body = PushPlusRequest {
            token: &token,
            title: &notification.title,
            content: &notification.content,
            template: "html",
        };

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(
                endpoint = %self.endpoint,
                %status,
                body = %body_text,
                "pushplus returned non-2xx status"
            );
            return Err(NotifyError::Rejected {
                code: i64::from(status.as_u16()),
                message: body_text,
            });
        }

        let reply: PushPlusReply = response.json().await?;
        check_reply(&reply)?;

        tracing::debug!(endpoint = %self.endpoint, "pushplus notification delivered");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "pushplus"
    }
}

fn check_reply(reply: &PushPlusReply) -> Result<(), NotifyError> {
    if reply.code == 200 {
        Ok(())
    } else {
        Err(NotifyError::Rejected {
            code: reply.code,
            message: reply.msg.clone(),
        })
    }
}
