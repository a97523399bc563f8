//! Provider abstraction over the messaging services announcements are
//! delivered to.
//!
//! Every concrete client classifies its own failures into a closed
//! `ProviderErrorKind`; the delivery engine only ever matches on the
//! kind and never inspects provider-specific error shapes.

pub mod discord;
pub mod telegram;

pub use discord::DiscordClient;
pub use telegram::TelegramClient;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{Destination, ProviderKind, RenderedAnnouncement};

/// Whether a provider failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Timeout, rate limit, 5xx. The queue retries the job.
    Transient,
    /// Bot removed/blocked, chat deleted. The destination gets disabled.
    Permanent,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn transient(message: impl fmt::Display) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            message: message.to_string(),
        }
    }

    pub fn permanent(message: impl fmt::Display) -> Self {
        Self {
            kind: ProviderErrorKind::Permanent,
            message: message.to_string(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == ProviderErrorKind::Permanent
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        // Network-level failures (timeouts, connect errors) are retryable
        ProviderError::transient(format!("request failed: {}", err))
    }
}

/// Basic chat metadata returned by `get_chat_info`.
#[derive(Debug, Clone)]
pub struct ChatInfo {
    pub id: String,
    pub title: Option<String>,
    pub kind: Option<String>,
}

/// Outgoing announcement payload. The engine renders text/buttons and
/// sanitizes the thumbnail before this ever reaches a client.
#[derive(Debug, Clone)]
pub struct OutgoingAnnouncement {
    pub text: String,
    pub buttons: Vec<crate::models::AnnouncementButton>,
    pub thumbnail_url: Option<String>,
}

impl OutgoingAnnouncement {
    pub fn from_rendered(rendered: RenderedAnnouncement, thumbnail_url: Option<String>) -> Self {
        Self {
            text: rendered.text,
            buttons: rendered.buttons,
            thumbnail_url,
        }
    }

    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
            thumbnail_url: None,
        }
    }
}

/// One capability interface for every messaging service.
#[async_trait]
pub trait ProviderClient: Send + Sync + fmt::Debug {
    /// Send a new announcement, returning the provider message id.
    async fn send_announcement(
        &self,
        chat_id: &str,
        message: &OutgoingAnnouncement,
    ) -> Result<String, ProviderError>;

    /// Edit an existing announcement in place.
    async fn edit_announcement(
        &self,
        chat_id: &str,
        message_id: &str,
        message: &OutgoingAnnouncement,
    ) -> Result<(), ProviderError>;

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<(), ProviderError>;

    async fn get_chat_info(&self, chat_id: &str) -> Result<ChatInfo, ProviderError>;

    async fn validate_bot_access(&self, chat_id: &str) -> Result<bool, ProviderError>;

    /// A client bound to a per-destination credential override.
    fn with_credential(&self, token: &str) -> Arc<dyn ProviderClient>;
}

/// Maps a provider kind (plus optional per-destination credential) to a
/// client. Built once at startup and injected into the engine, so tests
/// get an isolated, swappable provider set.
pub struct ProviderRegistry {
    telegram: Option<Arc<dyn ProviderClient>>,
    discord: Option<Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn new(
        telegram: Option<Arc<dyn ProviderClient>>,
        discord: Option<Arc<dyn ProviderClient>>,
    ) -> Self {
        Self { telegram, discord }
    }

    pub fn resolve_kind(
        &self,
        kind: ProviderKind,
        credential_override: Option<&str>,
    ) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        let base = match kind {
            ProviderKind::Telegram => self.telegram.as_ref(),
            ProviderKind::Discord => self.discord.as_ref(),
        }
        .ok_or_else(|| {
            // Missing configuration may be fixed by an operator; let the
            // queue's attempt ceiling bound the retries.
            ProviderError::transient(format!("{} provider not configured", kind.as_str()))
        })?;

        Ok(match credential_override {
            Some(token) => base.with_credential(token),
            None => base.clone(),
        })
    }

    pub fn resolve(
        &self,
        destination: &Destination,
    ) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        self.resolve_kind(
            destination.provider,
            destination.credential_override.as_deref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification_helpers() {
        let transient = ProviderError::transient("rate limited");
        assert_eq!(transient.kind, ProviderErrorKind::Transient);
        assert!(!transient.is_permanent());

        let permanent = ProviderError::permanent("bot was blocked");
        assert!(permanent.is_permanent());
        assert_eq!(permanent.to_string(), "bot was blocked");
    }

    #[test]
    fn test_registry_unconfigured_provider_is_transient() {
        let registry = ProviderRegistry::new(None, None);
        let err = registry
            .resolve_kind(ProviderKind::Telegram, None)
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Transient);
    }
}
