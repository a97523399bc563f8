//! Destination store.
//!
//! The engine mutates exactly three things here: `enabled` (flipped off
//! on a permanent provider error), `last_message_id`/`last_announced_at`
//! on a successful send, and `last_message_id` cleared after an offline
//! cleanup. Everything else belongs to the CRUD surface outside this
//! service.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::models::{Destination, ProviderKind};

#[async_trait]
pub trait DestinationStore: Send + Sync {
    async fn enabled_for_account(&self, account_id: Uuid) -> Result<Vec<Destination>>;

    /// Destinations flagged for post-stream cleanup, regardless of
    /// `enabled`: one disabled mid-stream still gets its announcement
    /// removed.
    async fn delete_after_end_for_account(&self, account_id: Uuid) -> Result<Vec<Destination>>;

    async fn by_id(&self, destination_id: Uuid) -> Result<Option<Destination>>;

    async fn disable(&self, destination_id: Uuid) -> Result<()>;

    async fn mark_announced(
        &self,
        destination_id: Uuid,
        message_id: &str,
        announced_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn clear_last_message(&self, destination_id: Uuid) -> Result<()>;
}

pub struct PgDestinationStore {
    db: PgPool,
}

impl PgDestinationStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    fn from_row(row: &PgRow) -> Option<Destination> {
        let provider: String = row.get("provider");
        let provider = ProviderKind::parse(&provider)?;
        Some(Destination {
            id: row.get("id"),
            account_id: row.get("account_id"),
            provider,
            chat_id: row.get("chat_id"),
            enabled: row.get("enabled"),
            delete_after_end: row.get("delete_after_end"),
            credential_override: row.get("credential_override"),
            last_message_id: row.get("last_message_id"),
            last_announced_at: row.get("last_announced_at"),
            created_at: row.get("created_at"),
        })
    }

    async fn fetch_where(&self, predicate: &str, account_id: Uuid) -> Result<Vec<Destination>> {
        let query = format!(
            r#"
            SELECT id, account_id, provider, chat_id, enabled, delete_after_end,
                   credential_override, last_message_id, last_announced_at, created_at
            FROM destinations
            WHERE account_id = $1 AND {}
            ORDER BY created_at
            "#,
            predicate
        );

        let rows = sqlx::query(&query)
            .bind(account_id)
            .fetch_all(&self.db)
            .await
            .context("Failed to fetch destinations")?;

        // Rows with an unknown provider value are skipped, not fatal
        Ok(rows.iter().filter_map(Self::from_row).collect())
    }
}

#[async_trait]
impl DestinationStore for PgDestinationStore {
    async fn enabled_for_account(&self, account_id: Uuid) -> Result<Vec<Destination>> {
        self.fetch_where("enabled = TRUE", account_id).await
    }

    async fn delete_after_end_for_account(&self, account_id: Uuid) -> Result<Vec<Destination>> {
        self.fetch_where("delete_after_end = TRUE", account_id).await
    }

    async fn by_id(&self, destination_id: Uuid) -> Result<Option<Destination>> {
        let query = r#"
            SELECT id, account_id, provider, chat_id, enabled, delete_after_end,
                   credential_override, last_message_id, last_announced_at, created_at
            FROM destinations
            WHERE id = $1
        "#;

        let row = sqlx::query(query)
            .bind(destination_id)
            .fetch_optional(&self.db)
            .await
            .context("Failed to fetch destination by id")?;

        Ok(row.as_ref().and_then(Self::from_row))
    }

    async fn disable(&self, destination_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE destinations SET enabled = FALSE WHERE id = $1")
            .bind(destination_id)
            .execute(&self.db)
            .await
            .context("Failed to disable destination")?;

        info!(destination_id = %destination_id, "destination disabled after permanent provider error");
        Ok(())
    }

    async fn mark_announced(
        &self,
        destination_id: Uuid,
        message_id: &str,
        announced_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE destinations SET last_message_id = $1, last_announced_at = $2 WHERE id = $3",
        )
        .bind(message_id)
        .bind(announced_at)
        .bind(destination_id)
        .execute(&self.db)
        .await
        .context("Failed to record announcement on destination")?;
        Ok(())
    }

    async fn clear_last_message(&self, destination_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE destinations SET last_message_id = NULL WHERE id = $1")
            .bind(destination_id)
            .execute(&self.db)
            .await
            .context("Failed to clear last message id")?;
        Ok(())
    }
}
