use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messaging provider a destination lives on. The set is closed at
/// compile time; per-destination credentials stay runtime-pluggable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Telegram,
    Discord,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Telegram => "telegram",
            ProviderKind::Discord => "discord",
        }
    }

    /// Parse the provider column value. Unknown values are a data bug,
    /// not a runtime choice, so this is strict.
    pub fn parse(s: &str) -> Option<ProviderKind> {
        match s.to_lowercase().as_str() {
            "telegram" => Some(ProviderKind::Telegram),
            "discord" => Some(ProviderKind::Discord),
            _ => None,
        }
    }
}

/// A specific chat/channel on one provider, owned by one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub id: Uuid,
    pub account_id: Uuid,
    pub provider: ProviderKind,
    pub chat_id: String,
    pub enabled: bool,
    pub delete_after_end: bool,
    /// Per-destination bot token override; None means the default client.
    pub credential_override: Option<String>,
    pub last_message_id: Option<String>,
    pub last_announced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Delivery log entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Queued,
    Sent,
    Deleted,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Deleted => "deleted",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> DeliveryStatus {
        match s.to_lowercase().as_str() {
            "sent" => DeliveryStatus::Sent,
            "deleted" => DeliveryStatus::Deleted,
            "failed" => DeliveryStatus::Failed,
            _ => DeliveryStatus::Queued,
        }
    }
}

/// One row per attempted send/edit/delete. Durable dedup witness and
/// audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    pub id: Uuid,
    pub destination_id: Uuid,
    pub session_id: String,
    pub provider: ProviderKind,
    pub message_id: Option<String>,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Stream lifecycle event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Online,
    Update,
    Offline,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Online => "online",
            EventKind::Update => "update",
            EventKind::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<EventKind> {
        match s.to_lowercase().as_str() {
            "online" => Some(EventKind::Online),
            "update" => Some(EventKind::Update),
            "offline" => Some(EventKind::Offline),
            _ => None,
        }
    }
}

/// One upstream stream lifecycle event, as handed to the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub kind: EventKind,
    /// Upstream stream/channel identifier; also resolves the account.
    pub stream_id: String,
    pub title: Option<String>,
    pub category: Option<String>,
    pub thumbnail_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub viewer_count: Option<u32>,
}

impl StreamEvent {
    /// Deterministic job identity: redundant webhook deliveries of the
    /// same logical event coalesce into one queued job.
    pub fn job_id(&self) -> String {
        let started = self
            .started_at
            .map(|t| t.timestamp().to_string())
            .unwrap_or_else(|| "-".to_string());
        format!("{}:{}:{}", self.kind.as_str(), self.stream_id, started)
    }
}

/// Direct-message destination for the best-effort streamer summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmDestination {
    pub provider: ProviderKind,
    pub chat_id: String,
}

/// Account owning one upstream channel and its destinations.
/// Read-only from the engine's point of view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub stream_id: String,
    pub channel_name: String,
    pub stream_url: String,
    /// Announcement template override; None uses the default template.
    pub template: Option<String>,
    pub button_label: Option<String>,
    pub dm_destination: Option<DmDestination>,
}

/// Rendered message text plus link buttons, produced by the renderer
/// and consumed opaquely by provider clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedAnnouncement {
    pub text: String,
    pub buttons: Vec<AnnouncementButton>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncementButton {
    pub label: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_provider_kind_roundtrip() {
        assert_eq!(ProviderKind::parse("telegram"), Some(ProviderKind::Telegram));
        assert_eq!(ProviderKind::parse("Discord"), Some(ProviderKind::Discord));
        assert_eq!(ProviderKind::parse("matrix"), None);
        assert_eq!(ProviderKind::Telegram.as_str(), "telegram");
    }

    #[test]
    fn test_delivery_status_parse() {
        assert_eq!(DeliveryStatus::parse("sent"), DeliveryStatus::Sent);
        assert_eq!(DeliveryStatus::parse("DELETED"), DeliveryStatus::Deleted);
        assert_eq!(DeliveryStatus::parse("failed"), DeliveryStatus::Failed);
        assert_eq!(DeliveryStatus::parse("unknown"), DeliveryStatus::Queued);
    }

    #[test]
    fn test_event_kind_parse() {
        assert_eq!(EventKind::parse("online"), Some(EventKind::Online));
        assert_eq!(EventKind::parse("OFFLINE"), Some(EventKind::Offline));
        assert_eq!(EventKind::parse("started"), None);
    }

    #[test]
    fn test_job_id_is_deterministic() {
        let started = Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0).unwrap();
        let event = StreamEvent {
            kind: EventKind::Online,
            stream_id: "ch-1".to_string(),
            title: Some("Speedrun".to_string()),
            category: None,
            thumbnail_url: None,
            started_at: Some(started),
            viewer_count: None,
        };
        assert_eq!(event.job_id(), format!("online:ch-1:{}", started.timestamp()));

        let offline = StreamEvent {
            kind: EventKind::Offline,
            started_at: None,
            ..event.clone()
        };
        assert_eq!(offline.job_id(), "offline:ch-1:-");
    }
}
