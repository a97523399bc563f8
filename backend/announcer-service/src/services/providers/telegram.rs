//! Telegram Bot API client.
//!
//! Sends announcements as photo messages with an inline-keyboard link
//! when a thumbnail survives sanitization, plain text messages
//! otherwise. Classifies Bot API failures into the closed
//! transient/permanent taxonomy the engine consumes.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{
    ChatInfo, OutgoingAnnouncement, ProviderClient, ProviderError, ProviderErrorKind,
};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug)]
pub struct TelegramClient {
    token: String,
    api_base: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<u16>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiChat {
    id: i64,
    title: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Map a Bot API failure to the retryable/permanent taxonomy.
///
/// 401/403 mean the token is dead or the bot was blocked/kicked; 400
/// "chat not found" means the destination is gone. Rate limits and
/// server errors are worth retrying.
fn classify_api_error(error_code: u16, description: &str) -> ProviderErrorKind {
    let description = description.to_lowercase();
    match error_code {
        401 | 403 => ProviderErrorKind::Permanent,
        400 if description.contains("chat not found")
            || description.contains("group chat was upgraded")
            || description.contains("not enough rights") =>
        {
            ProviderErrorKind::Permanent
        }
        429 => ProviderErrorKind::Transient,
        code if code >= 500 => ProviderErrorKind::Transient,
        _ => ProviderErrorKind::Permanent,
    }
}

impl TelegramClient {
    pub fn new(token: String, request_timeout: Duration) -> Self {
        Self::with_api_base(token, DEFAULT_API_BASE.to_string(), request_timeout)
    }

    pub fn with_api_base(token: String, api_base: String, request_timeout: Duration) -> Self {
        Self {
            token,
            api_base,
            http_client: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Stored message ids must be numeric for the Bot API; anything
    /// else is corrupt state, not worth a retry.
    fn parse_message_id(message_id: &str) -> Result<i64, ProviderError> {
        message_id.parse::<i64>().map_err(|_| {
            ProviderError::permanent(format!("malformed telegram message id: {}", message_id))
        })
    }

    fn reply_markup(message: &OutgoingAnnouncement) -> Option<serde_json::Value> {
        if message.buttons.is_empty() {
            return None;
        }
        let rows: Vec<Vec<serde_json::Value>> = message
            .buttons
            .iter()
            .map(|b| vec![json!({ "text": b.label, "url": b.url })])
            .collect();
        Some(json!({ "inline_keyboard": rows }))
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let response = self
            .http_client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let api: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| ProviderError::transient(format!("invalid Bot API response: {}", e)))?;

        if api.ok {
            api.result.ok_or_else(|| {
                ProviderError::transient("Bot API returned ok without a result".to_string())
            })
        } else {
            let code = api.error_code.unwrap_or_else(|| status.as_u16());
            let description = api
                .description
                .unwrap_or_else(|| "unknown Bot API error".to_string());
            let message = format!("Telegram API error {}: {}", code, description);
            Err(ProviderError {
                kind: classify_api_error(code, &description),
                message,
            })
        }
    }
}

#[async_trait]
impl ProviderClient for TelegramClient {
    async fn send_announcement(
        &self,
        chat_id: &str,
        message: &OutgoingAnnouncement,
    ) -> Result<String, ProviderError> {
        let mut body = match &message.thumbnail_url {
            Some(photo) => json!({
                "chat_id": chat_id,
                "photo": photo,
                "caption": message.text,
            }),
            None => json!({
                "chat_id": chat_id,
                "text": message.text,
            }),
        };
        if let Some(markup) = Self::reply_markup(message) {
            body["reply_markup"] = markup;
        }

        let method = if message.thumbnail_url.is_some() {
            "sendPhoto"
        } else {
            "sendMessage"
        };
        let sent: ApiMessage = self.call(method, body).await?;
        debug!(chat_id = %chat_id, message_id = sent.message_id, "telegram announcement sent");
        Ok(sent.message_id.to_string())
    }

    async fn edit_announcement(
        &self,
        chat_id: &str,
        message_id: &str,
        message: &OutgoingAnnouncement,
    ) -> Result<(), ProviderError> {
        let message_id = Self::parse_message_id(message_id)?;
        let mut body = match &message.thumbnail_url {
            Some(_) => json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "caption": message.text,
            }),
            None => json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "text": message.text,
            }),
        };
        if let Some(markup) = Self::reply_markup(message) {
            body["reply_markup"] = markup;
        }

        let method = if message.thumbnail_url.is_some() {
            "editMessageCaption"
        } else {
            "editMessageText"
        };
        match self.call::<serde_json::Value>(method, body).await {
            Ok(_) => Ok(()),
            // Re-editing with identical content is not a failure
            Err(e) if e.message.contains("message is not modified") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<(), ProviderError> {
        let body = json!({
            "chat_id": chat_id,
            "message_id": Self::parse_message_id(message_id)?,
        });
        self.call::<serde_json::Value>("deleteMessage", body)
            .await
            .map(|_| ())
    }

    async fn get_chat_info(&self, chat_id: &str) -> Result<ChatInfo, ProviderError> {
        let chat: ApiChat = self.call("getChat", json!({ "chat_id": chat_id })).await?;
        Ok(ChatInfo {
            id: chat.id.to_string(),
            title: chat.title,
            kind: chat.kind,
        })
    }

    async fn validate_bot_access(&self, chat_id: &str) -> Result<bool, ProviderError> {
        match self.get_chat_info(chat_id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_permanent() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn with_credential(&self, token: &str) -> Arc<dyn ProviderClient> {
        Arc::new(TelegramClient {
            token: token.to_string(),
            api_base: self.api_base.clone(),
            http_client: self.http_client.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_bot_is_permanent() {
        assert_eq!(
            classify_api_error(403, "Forbidden: bot was blocked by the user"),
            ProviderErrorKind::Permanent
        );
        assert_eq!(
            classify_api_error(403, "Forbidden: bot was kicked from the group chat"),
            ProviderErrorKind::Permanent
        );
    }

    #[test]
    fn test_missing_chat_is_permanent() {
        assert_eq!(
            classify_api_error(400, "Bad Request: chat not found"),
            ProviderErrorKind::Permanent
        );
    }

    #[test]
    fn test_rate_limit_and_server_errors_are_transient() {
        assert_eq!(
            classify_api_error(429, "Too Many Requests: retry after 5"),
            ProviderErrorKind::Transient
        );
        assert_eq!(
            classify_api_error(502, "Bad Gateway"),
            ProviderErrorKind::Transient
        );
    }

    #[test]
    fn test_other_bad_requests_are_permanent() {
        assert_eq!(
            classify_api_error(400, "Bad Request: message text is empty"),
            ProviderErrorKind::Permanent
        );
    }

    #[tokio::test]
    async fn test_malformed_message_id_is_permanent() {
        let client = TelegramClient::new("token".to_string(), Duration::from_secs(1));
        let message = OutgoingAnnouncement::text_only("live");

        let err = client
            .edit_announcement("chat-1", "not-a-number", &message)
            .await
            .unwrap_err();
        assert!(err.is_permanent());

        let err = client.delete_message("chat-1", "").await.unwrap_err();
        assert!(err.is_permanent());
    }

    #[test]
    fn test_reply_markup_shape() {
        let message = OutgoingAnnouncement {
            text: "live".to_string(),
            buttons: vec![crate::models::AnnouncementButton {
                label: "Watch".to_string(),
                url: "https://example.com/ch".to_string(),
            }],
            thumbnail_url: None,
        };
        let markup = TelegramClient::reply_markup(&message).unwrap();
        assert_eq!(markup["inline_keyboard"][0][0]["text"], "Watch");
    }
}
