//! Inbound side of the Telegram channel: `getUpdates` long polling.
//!
//! [`UpdatePoller`] keeps the acknowledgement offset itself, so each call to
//! [`UpdatePoller::poll`] returns only messages not seen before. Updates that
//! carry no text (stickers, joins, edits) are acknowledged and dropped.

use std::time::Duration;

use pulse_core::ParticipantId;
use serde::Deserialize;

use crate::telegram::resolve_token;
use crate::traits::NotifyError;

/// A text message received from a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub update_id: i64,
    pub chat_id: ParticipantId,
    /// `@handle`, when the participant has one.
    pub username: Option<String>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    username: Option<String>,
}

/// Long-polls the Bot API for new messages.
#[derive(Debug)]
pub struct UpdatePoller {
    bot_token: String,
    api_base: String,
    poll_timeout: Duration,
    offset: Option<i64>,
    client: reqwest::Client,
}

impl UpdatePoller {
    pub fn from_config(
        bot_token: String,
        api_base: String,
        poll_timeout: Duration,
    ) -> Result<Self, NotifyError> {
        // The HTTP timeout must outlive the server-side long-poll window.
        let client = reqwest::Client::builder()
            .timeout(poll_timeout + Duration::from_secs(10))
            .build()?;
        Ok(Self {
            bot_token: resolve_token(bot_token)?,
            api_base: api_base.trim_end_matches('/').to_string(),
            poll_timeout,
            offset: None,
            client,
        })
    }

    /// Offset that will be acknowledged on the next poll.
    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    /// Wait up to the poll timeout for new messages.
    pub async fn poll(&mut self) -> Result<Vec<IncomingMessage>, NotifyError> {
        let url = format!("{}/bot{}/getUpdates", self.api_base, self.bot_token);
        let mut body = serde_json::json!({
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        if let Some(offset) = self.offset {
            body["offset"] = serde_json::Value::from(offset);
        }

        let response: UpdatesResponse = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if !response.ok {
            return Err(NotifyError::Api(format!(
                "Telegram getUpdates failed: {}",
                response.description.as_deref().unwrap_or("unknown error")
            )));
        }

        let mut messages = Vec::with_capacity(response.result.len());
        for update in response.result {
            self.offset = Some(self.offset.map_or(update.update_id + 1, |o| {
                o.max(update.update_id + 1)
            }));
            let Some(message) = update.message else { continue };
            let Some(text) = message.text else { continue };
            messages.push(IncomingMessage {
                update_id: update.update_id,
                chat_id: message.chat.id,
                username: message.chat.username.map(|u| format!("@{u}")),
                text,
            });
        }

        if !messages.is_empty() {
            tracing::debug!(count = messages.len(), offset = ?self.offset, "received updates");
        }
        Ok(messages)
    }
}
