//! Telegram Bot API client
//!
//! Delivers replies through `sendMessage`. Delivery failures are logged
//! and dropped; the webhook ack does not depend on them.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error};

/// Anything that can deliver a text reply to a chat
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str, reply_to: Option<i64>);
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
}

/// Telegram Bot API client
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    token: String,
    base_url: String,
}

impl TelegramClient {
    pub fn new(client: Client, token: &str, base_url: &str) -> Self {
        Self {
            client,
            token: token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create from config
    pub fn from_config(config: &crate::config::Config) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self::new(client, &config.telegram_token, &config.telegram_api_base))
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }
}

#[async_trait]
impl ChatPlatform for TelegramClient {
    async fn send(&self, chat_id: i64, text: &str, reply_to: Option<i64>) {
        let payload = SendMessage {
            chat_id,
            text,
            parse_mode: "Markdown",
            reply_to_message_id: reply_to,
        };

        let response = match self
            .client
            .post(self.method_url("sendMessage"))
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // reqwest errors embed the URL, which carries the token
                error!("Telegram sendMessage failed for chat {}: {}", chat_id, e.without_url());
                return;
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!("Sent {} chars to chat {}", text.len(), chat_id);
        } else {
            let body = response.text().await.unwrap_or_default();
            error!("Telegram sendMessage failed: {} {}", status, body);
        }
    }
}
