//! Telegram Bot API notifier with reply keyboards.
//!
//! Delivers messages via the Telegram Bot API `sendMessage` endpoint.
//! Answer options are presented as a one-time reply keyboard; plain messages
//! withdraw any keyboard still shown.

use pulse_core::{Affordances, ParticipantId};
use serde_json::{json, Value};

use crate::traits::{Notifier, NotifyError};

/// Resolve a token given literally or as a `${ENV_VAR}` reference.
pub(crate) fn resolve_token(bot_token: String) -> Result<String, NotifyError> {
    let resolved = if bot_token.starts_with("${") {
        let var_name = bot_token
            .strip_prefix("${")
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| {
                NotifyError::Config(format!("Malformed env var reference: {bot_token}"))
            })?;
        std::env::var(var_name).map_err(|_| {
            NotifyError::Config(format!("Environment variable '{var_name}' is not set"))
        })?
    } else {
        bot_token
    };

    if resolved.is_empty() {
        return Err(NotifyError::Config(
            "Telegram bot token must not be empty".to_string(),
        ));
    }
    Ok(resolved)
}

/// Build the `reply_markup` object for a set of affordances.
///
/// Yes/no answers share one keyboard row; each choice gets its own row.
pub fn reply_markup(affordances: &Affordances) -> Value {
    match affordances {
        Affordances::None => json!({ "remove_keyboard": true }),
        Affordances::YesNo => json!({
            "keyboard": [[{ "text": "Yes" }, { "text": "No" }]],
            "one_time_keyboard": true,
            "resize_keyboard": true,
        }),
        Affordances::Choices(choices) => {
            let rows: Vec<Value> = choices
                .iter()
                .map(|choice| json!([{ "text": choice }]))
                .collect();
            json!({
                "keyboard": rows,
                "one_time_keyboard": true,
                "resize_keyboard": true,
            })
        }
    }
}

/// Sends messages to participants via the Telegram Bot API.
#[derive(Debug)]
pub struct TelegramNotifier {
    bot_token: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    /// Creates a new `TelegramNotifier` from configuration values.
    ///
    /// If `bot_token` starts with `${`, the value between `${` and `}` is
    /// resolved as an environment variable name. Returns
    /// [`NotifyError::Config`] if the token is empty or the env var is missing.
    pub fn from_config(bot_token: String, api_base: String) -> Result<Self, NotifyError> {
        Ok(Self {
            bot_token: resolve_token(bot_token)?,
            api_base: api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    /// Sends a message via the Telegram `sendMessage` API.
    async fn deliver(
        &self,
        recipient: ParticipantId,
        text: &str,
        affordances: &Affordances,
    ) -> Result<(), NotifyError> {
        let body = json!({
            "chat_id": recipient,
            "text": text,
            "reply_markup": reply_markup(affordances),
        });

        tracing::debug!(
            chat_id = recipient,
            options = affordances.labels().len(),
            "Sending Telegram message"
        );

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let resp_body: Value = response.json().await?;

        if resp_body.get("ok") == Some(&Value::Bool(true)) {
            tracing::debug!(chat_id = recipient, "Telegram message sent");
            return Ok(());
        }

        // Handle rate limiting (HTTP 429).
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp_body
                .get("parameters")
                .and_then(|p| p.get("retry_after"))
                .and_then(|v| v.as_u64())
                .unwrap_or(30);
            return Err(NotifyError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        let description = resp_body
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown Telegram API error");

        Err(NotifyError::Api(format!("Telegram API error: {description}")))
    }

    fn channel_name(&self) -> &str {
        "telegram"
    }
}
