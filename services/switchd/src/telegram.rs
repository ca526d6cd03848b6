//! Telegram Bot API client and progress sink.
//!
//! The daemon uses one bot for two things: the progress sink (one message
//! per switch, edited in place as phases complete) and the command loop in
//! `bot.rs` (long-polled `getUpdates`).

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::notify::{ProgressHandle, ProgressSink};

/// Errors from the Telegram Bot API.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error {code}: {description}")]
    Api { code: i64, description: String },
}

impl TelegramError {
    /// Telegram rejects edits that would leave a message unchanged. The
    /// progress sequence treats that as success.
    pub fn is_not_modified(&self) -> bool {
        matches!(
            self,
            TelegramError::Api { description, .. }
                if description.contains("message is not modified")
        )
    }
}

/// Every Bot API response carries `ok` plus either `result` or an error.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

/// A message the bot sent.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
}

/// One long-poll update.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

/// An incoming chat message.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Minimal Bot API client.
pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(bot_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("https://api.telegram.org/bot{bot_token}"),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: std::time::Duration,
    ) -> Result<T, TelegramError> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&params)
            .send()
            .await?;

        let body: ApiResponse<T> = response.json().await?;
        match body {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse {
                error_code,
                description,
                ..
            } => Err(TelegramError::Api {
                code: error_code.unwrap_or(0),
                description: description.unwrap_or_else(|| "unknown error".to_string()),
            }),
        }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message, TelegramError> {
        self.call(
            "sendMessage",
            json!({ "chat_id": chat_id, "text": text }),
            std::time::Duration::from_secs(15),
        )
        .await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), TelegramError> {
        // The result is the edited Message (or `true` for inline messages);
        // neither is interesting here.
        self.call::<serde_json::Value>(
            "editMessageText",
            json!({ "chat_id": chat_id, "message_id": message_id, "text": text }),
            std::time::Duration::from_secs(15),
        )
        .await
        .map(|_| ())
    }

    /// Long-poll for updates past `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            json!({ "offset": offset, "timeout": timeout_secs }),
            // Request timeout must outlive the server-side poll window.
            std::time::Duration::from_secs(timeout_secs + 10),
        )
        .await
    }
}

/// Progress sink backed by one Telegram chat.
pub struct TelegramSink {
    client: Arc<TelegramClient>,
    chat_id: i64,
}

impl TelegramSink {
    pub fn new(client: Arc<TelegramClient>, chat_id: i64) -> Self {
        Self { client, chat_id }
    }
}

#[async_trait]
impl ProgressSink for TelegramSink {
    async fn open(&self, text: &str) -> Option<ProgressHandle> {
        match self.client.send_message(self.chat_id, text).await {
            Ok(message) => Some(ProgressHandle {
                message_id: message.message_id,
            }),
            Err(e) => {
                error!(error = %e, "Failed to send initial progress message");
                None
            }
        }
    }

    async fn update(&self, handle: ProgressHandle, text: &str) {
        match self
            .client
            .edit_message_text(self.chat_id, handle.message_id, text)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_modified() => {}
            Err(e) => warn!(error = %e, "Failed to update progress message"),
        }
    }

    async fn notify_once(&self, text: &str) {
        if let Err(e) = self.client.send_message(self.chat_id, text).await {
            warn!(error = %e, "Failed to send notification");
        }
    }
}
