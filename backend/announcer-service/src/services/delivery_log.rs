//! Durable delivery log.
//!
//! One row per attempted send/delete, keyed by (destination, session).
//! The log is both the dedup witness (has this session already been
//! announced here?) and the audit trail. Writes are append or
//! status-transition only; a row never moves back to an earlier status.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{DeliveryLogEntry, DeliveryStatus, ProviderKind};

#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    /// The current `sent` entry for one (destination, session), if any.
    async fn sent_entry(
        &self,
        destination_id: Uuid,
        session_id: &str,
    ) -> Result<Option<DeliveryLogEntry>>;

    /// Every `sent` entry for a session across an account's destinations.
    async fn sent_entries_for_account(
        &self,
        account_id: Uuid,
        session_id: &str,
    ) -> Result<Vec<DeliveryLogEntry>>;

    /// Most recent `sent` entry for a destination inside a recency
    /// window; guards stale offline retries from deleting a message
    /// that belongs to a later session.
    async fn latest_sent_within(
        &self,
        destination_id: Uuid,
        window: Duration,
    ) -> Result<Option<DeliveryLogEntry>>;

    async fn record_sent(
        &self,
        destination_id: Uuid,
        session_id: &str,
        provider: ProviderKind,
        message_id: &str,
    ) -> Result<DeliveryLogEntry>;

    async fn record_failed(
        &self,
        destination_id: Uuid,
        session_id: &str,
        provider: ProviderKind,
        error: &str,
    ) -> Result<DeliveryLogEntry>;

    /// Transition the entry matching this message id to `deleted`.
    async fn mark_deleted(&self, destination_id: Uuid, message_id: &str) -> Result<()>;

    /// Remove a stale row (a `sent` entry with no message id left by a
    /// crashed worker); it cannot witness dedup for a real send.
    async fn delete_entry(&self, entry_id: Uuid) -> Result<()>;
}

pub struct PgDeliveryLogStore {
    db: PgPool,
}

const ENTRY_COLUMNS: &str = "id, destination_id, session_id, provider, message_id, status, error, \
                             queued_at, sent_at, deleted_at";

impl PgDeliveryLogStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    fn from_row(row: &PgRow) -> Option<DeliveryLogEntry> {
        let provider: String = row.get("provider");
        let status: String = row.get("status");
        Some(DeliveryLogEntry {
            id: row.get("id"),
            destination_id: row.get("destination_id"),
            session_id: row.get("session_id"),
            provider: ProviderKind::parse(&provider)?,
            message_id: row.get("message_id"),
            status: DeliveryStatus::parse(&status),
            error: row.get("error"),
            queued_at: row.get("queued_at"),
            sent_at: row.get("sent_at"),
            deleted_at: row.get("deleted_at"),
        })
    }
}

#[async_trait]
impl DeliveryLogStore for PgDeliveryLogStore {
    async fn sent_entry(
        &self,
        destination_id: Uuid,
        session_id: &str,
    ) -> Result<Option<DeliveryLogEntry>> {
        let query = format!(
            "SELECT {} FROM delivery_log \
             WHERE destination_id = $1 AND session_id = $2 AND status = 'sent' \
             ORDER BY queued_at DESC LIMIT 1",
            ENTRY_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(destination_id)
            .bind(session_id)
            .fetch_optional(&self.db)
            .await
            .context("Failed to fetch sent entry")?;

        Ok(row.as_ref().and_then(Self::from_row))
    }

    async fn sent_entries_for_account(
        &self,
        account_id: Uuid,
        session_id: &str,
    ) -> Result<Vec<DeliveryLogEntry>> {
        let query = "SELECT l.id, l.destination_id, l.session_id, l.provider, l.message_id, \
                     l.status, l.error, l.queued_at, l.sent_at, l.deleted_at \
                     FROM delivery_log l \
                     JOIN destinations d ON d.id = l.destination_id \
                     WHERE d.account_id = $1 AND l.session_id = $2 AND l.status = 'sent'";

        let rows = sqlx::query(query)
            .bind(account_id)
            .bind(session_id)
            .fetch_all(&self.db)
            .await
            .context("Failed to fetch sent entries for account")?;

        Ok(rows.iter().filter_map(Self::from_row).collect())
    }

    async fn latest_sent_within(
        &self,
        destination_id: Uuid,
        window: Duration,
    ) -> Result<Option<DeliveryLogEntry>> {
        let cutoff: DateTime<Utc> = Utc::now() - window;
        let query = format!(
            "SELECT {} FROM delivery_log \
             WHERE destination_id = $1 AND status = 'sent' AND sent_at >= $2 \
             ORDER BY sent_at DESC LIMIT 1",
            ENTRY_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(destination_id)
            .bind(cutoff)
            .fetch_optional(&self.db)
            .await
            .context("Failed to fetch recent sent entry")?;

        Ok(row.as_ref().and_then(Self::from_row))
    }

    async fn record_sent(
        &self,
        destination_id: Uuid,
        session_id: &str,
        provider: ProviderKind,
        message_id: &str,
    ) -> Result<DeliveryLogEntry> {
        let entry = DeliveryLogEntry {
            id: Uuid::new_v4(),
            destination_id,
            session_id: session_id.to_string(),
            provider,
            message_id: Some(message_id.to_string()),
            status: DeliveryStatus::Sent,
            error: None,
            queued_at: Utc::now(),
            sent_at: Some(Utc::now()),
            deleted_at: None,
        };

        sqlx::query(
            "INSERT INTO delivery_log \
             (id, destination_id, session_id, provider, message_id, status, queued_at, sent_at) \
             VALUES ($1, $2, $3, $4, $5, 'sent', $6, $7)",
        )
        .bind(entry.id)
        .bind(entry.destination_id)
        .bind(&entry.session_id)
        .bind(provider.as_str())
        .bind(&entry.message_id)
        .bind(entry.queued_at)
        .bind(entry.sent_at)
        .execute(&self.db)
        .await
        .context("Failed to record sent delivery")?;

        Ok(entry)
    }

    async fn record_failed(
        &self,
        destination_id: Uuid,
        session_id: &str,
        provider: ProviderKind,
        error: &str,
    ) -> Result<DeliveryLogEntry> {
        let entry = DeliveryLogEntry {
            id: Uuid::new_v4(),
            destination_id,
            session_id: session_id.to_string(),
            provider,
            message_id: None,
            status: DeliveryStatus::Failed,
            error: Some(error.to_string()),
            queued_at: Utc::now(),
            sent_at: None,
            deleted_at: None,
        };

        sqlx::query(
            "INSERT INTO delivery_log \
             (id, destination_id, session_id, provider, status, error, queued_at) \
             VALUES ($1, $2, $3, $4, 'failed', $5, $6)",
        )
        .bind(entry.id)
        .bind(entry.destination_id)
        .bind(&entry.session_id)
        .bind(provider.as_str())
        .bind(&entry.error)
        .bind(entry.queued_at)
        .execute(&self.db)
        .await
        .context("Failed to record failed delivery")?;

        Ok(entry)
    }

    async fn mark_deleted(&self, destination_id: Uuid, message_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE delivery_log SET status = 'deleted', deleted_at = $1 \
             WHERE destination_id = $2 AND message_id = $3 AND status = 'sent'",
        )
        .bind(Utc::now())
        .bind(destination_id)
        .bind(message_id)
        .execute(&self.db)
        .await
        .context("Failed to mark delivery deleted")?;
        Ok(())
    }

    async fn delete_entry(&self, entry_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM delivery_log WHERE id = $1")
            .bind(entry_id)
            .execute(&self.db)
            .await
            .context("Failed to delete stale log entry")?;
        Ok(())
    }
}
