//! Discord REST client.
//!
//! Announcements land as channel messages with an embed (thumbnail as
//! the embed image, buttons as link components). Error classification:
//! missing access / unknown channel are permanent, rate limits and 5xx
//! are transient.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{
    ChatInfo, OutgoingAnnouncement, ProviderClient, ProviderError, ProviderErrorKind,
};

const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug)]
pub struct DiscordClient {
    token: String,
    api_base: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiChannel {
    id: String,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<u8>,
}

fn classify_status(status: u16) -> ProviderErrorKind {
    match status {
        401 | 403 | 404 => ProviderErrorKind::Permanent,
        429 => ProviderErrorKind::Transient,
        code if code >= 500 => ProviderErrorKind::Transient,
        _ => ProviderErrorKind::Permanent,
    }
}

impl DiscordClient {
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

    fn message_body(message: &OutgoingAnnouncement) -> serde_json::Value {
        let mut embed = json!({ "description": message.text });
        if let Some(thumbnail) = &message.thumbnail_url {
            embed["image"] = json!({ "url": thumbnail });
        }

        let mut body = json!({ "embeds": [embed] });
        if !message.buttons.is_empty() {
            let components: Vec<serde_json::Value> = message
                .buttons
                .iter()
                .map(|b| json!({ "type": 2, "style": 5, "label": b.label, "url": b.url }))
                .collect();
            body["components"] = json!([{ "type": 1, "components": components }]);
        }
        body
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Option<T>, ProviderError> {
        let mut request = self
            .http_client
            .request(method, format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Bot {}", self.token));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            if status == reqwest::StatusCode::NO_CONTENT {
                return Ok(None);
            }
            let parsed: T = response.json().await.map_err(|e| {
                ProviderError::transient(format!("invalid Discord response: {}", e))
            })?;
            Ok(Some(parsed))
        } else {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            Err(ProviderError {
                kind: classify_status(status.as_u16()),
                message: format!("Discord API error {}: {}", status.as_u16(), detail),
            })
        }
    }
}

#[async_trait]
impl ProviderClient for DiscordClient {
    async fn send_announcement(
        &self,
        chat_id: &str,
        message: &OutgoingAnnouncement,
    ) -> Result<String, ProviderError> {
        let path = format!("/channels/{}/messages", chat_id);
        let sent: ApiMessage = self
            .request(reqwest::Method::POST, &path, Some(Self::message_body(message)))
            .await?
            .ok_or_else(|| ProviderError::transient("empty Discord send response"))?;
        debug!(channel_id = %chat_id, message_id = %sent.id, "discord announcement sent");
        Ok(sent.id)
    }

    async fn edit_announcement(
        &self,
        chat_id: &str,
        message_id: &str,
        message: &OutgoingAnnouncement,
    ) -> Result<(), ProviderError> {
        let path = format!("/channels/{}/messages/{}", chat_id, message_id);
        self.request::<ApiMessage>(reqwest::Method::PATCH, &path, Some(Self::message_body(message)))
            .await
            .map(|_| ())
    }

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<(), ProviderError> {
        let path = format!("/channels/{}/messages/{}", chat_id, message_id);
        self.request::<serde_json::Value>(reqwest::Method::DELETE, &path, None)
            .await
            .map(|_| ())
    }

    async fn get_chat_info(&self, chat_id: &str) -> Result<ChatInfo, ProviderError> {
        let path = format!("/channels/{}", chat_id);
        let channel: ApiChannel = self
            .request(reqwest::Method::GET, &path, None)
            .await?
            .ok_or_else(|| ProviderError::transient("empty Discord channel response"))?;
        Ok(ChatInfo {
            id: channel.id,
            title: channel.name,
            kind: channel.kind.map(|k| k.to_string()),
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
        Arc::new(DiscordClient {
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
    fn test_missing_access_is_permanent() {
        assert_eq!(classify_status(403), ProviderErrorKind::Permanent);
        assert_eq!(classify_status(404), ProviderErrorKind::Permanent);
    }

    #[test]
    fn test_rate_limit_and_server_errors_are_transient() {
        assert_eq!(classify_status(429), ProviderErrorKind::Transient);
        assert_eq!(classify_status(503), ProviderErrorKind::Transient);
    }

    #[test]
    fn test_message_body_includes_embed_and_components() {
        let message = OutgoingAnnouncement {
            text: "live now".to_string(),
            buttons: vec![crate::models::AnnouncementButton {
                label: "Watch".to_string(),
                url: "https://example.com/ch".to_string(),
            }],
            thumbnail_url: Some("https://cdn.example/preview.jpg".to_string()),
        };
        let body = DiscordClient::message_body(&message);
        assert_eq!(body["embeds"][0]["description"], "live now");
        assert_eq!(
            body["embeds"][0]["image"]["url"],
            "https://cdn.example/preview.jpg"
        );
        assert_eq!(body["components"][0]["components"][0]["style"], 5);
    }
}
