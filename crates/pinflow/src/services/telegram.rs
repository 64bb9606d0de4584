//! Telegram Bot API transport: long-polled updates in, messages with reply
//! keyboards out.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::{ChatApi, Keyboard, ServiceError};

const API_BASE: &str = "https://api.telegram.org";
const POLL_TIMEOUT_SECS: u64 = 30;

/// One text message pulled from the update stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub update_id: i64,
    pub user_id: i64,
    pub chat_id: i64,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::blocking::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    text: Option<String>,
    from: Option<Sender>,
    chat: Option<Chat>,
}

#[derive(Debug, Deserialize)]
struct Sender {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

impl TelegramClient {
    pub fn new(token: String) -> Result<Self, ServiceError> {
        if token.trim().is_empty() {
            return Err(ServiceError::Auth("telegram_bot_token".to_string()));
        }
        Ok(Self {
            // Client timeout must outlast the long-poll window.
            http: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
                .build()?,
            base_url: API_BASE.to_string(),
            token,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// Long-polls for updates past `offset`. Returns text messages only;
    /// media-only updates still advance the offset via their update id.
    pub fn poll_updates(&self, offset: i64) -> Result<Vec<Inbound>, ServiceError> {
        let resp = self
            .http
            .get(self.method_url("getUpdates"))
            .query(&[("timeout", POLL_TIMEOUT_SECS as i64), ("offset", offset)])
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }

        let body: UpdatesResponse = resp.json()?;
        if !body.ok {
            return Err(ServiceError::Upstream(
                "getUpdates returned ok=false".to_string(),
            ));
        }
        Ok(body.result.into_iter().filter_map(flatten_update).collect())
    }
}

fn flatten_update(update: Update) -> Option<Inbound> {
    let message = update.message?;
    let text = message.text?;
    let user_id = message.from?.id;
    let chat_id = message.chat?.id;
    Some(Inbound {
        update_id: update.update_id,
        user_id,
        chat_id,
        text,
    })
}

impl ChatApi for TelegramClient {
    fn send(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) {
        let mut payload = json!({ "chat_id": chat_id, "text": text });
        if let Some(kb) = keyboard {
            payload["reply_markup"] = json!({
                "keyboard": kb.rows,
                "resize_keyboard": true,
                "one_time_keyboard": false,
            });
        }

        // Notifications are best-effort; a failed send never fails the job.
        let result = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&payload)
            .send();
        match result {
            Ok(resp) if !resp.status().is_success() => {
                warn!("sendMessage to {} returned {}", chat_id, resp.status());
            }
            Ok(_) => {}
            Err(e) => warn!("sendMessage to {} failed: {}", chat_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_token_is_rejected() {
        assert!(matches!(
            TelegramClient::new(String::new()),
            Err(ServiceError::Auth(_))
        ));
    }

    #[test]
    fn test_flatten_update_requires_text_and_ids() {
        let full: Update = serde_json::from_value(json!({
            "update_id": 7,
            "message": {
                "text": "run",
                "from": { "id": 42 },
                "chat": { "id": 99 }
            }
        }))
        .unwrap();
        assert_eq!(
            flatten_update(full),
            Some(Inbound {
                update_id: 7,
                user_id: 42,
                chat_id: 99,
                text: "run".to_string(),
            })
        );

        let no_text: Update = serde_json::from_value(json!({
            "update_id": 8,
            "message": { "from": { "id": 42 }, "chat": { "id": 99 } }
        }))
        .unwrap();
        assert!(flatten_update(no_text).is_none());

        let no_message: Update = serde_json::from_value(json!({ "update_id": 9 })).unwrap();
        assert!(flatten_update(no_message).is_none());
    }
}
