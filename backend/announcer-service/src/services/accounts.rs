//! Account resolution (external collaborator seam).
//!
//! The engine only needs a read interface: which account owns a stream
//! identifier, and its rendering/DM preferences. Writes to accounts
//! happen elsewhere (connection flow, dashboard).

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::models::{Account, DmDestination, ProviderKind};

#[async_trait]
pub trait AccountResolver: Send + Sync {
    /// Resolve the account owning a stream identifier; None is a normal
    /// outcome (event for an unknown channel), never an error.
    async fn account_by_stream_id(&self, stream_id: &str) -> Result<Option<Account>>;
}

pub struct PgAccountResolver {
    db: PgPool,
}

impl PgAccountResolver {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountResolver for PgAccountResolver {
    async fn account_by_stream_id(&self, stream_id: &str) -> Result<Option<Account>> {
        let query = r#"
            SELECT id, stream_id, channel_name, stream_url, template, button_label,
                   dm_provider, dm_chat_id
            FROM accounts
            WHERE stream_id = $1
        "#;

        let row = sqlx::query(query)
            .bind(stream_id)
            .fetch_optional(&self.db)
            .await
            .context("Failed to fetch account by stream id")?;

        Ok(row.map(|row| {
            let dm_provider: Option<String> = row.get("dm_provider");
            let dm_chat_id: Option<String> = row.get("dm_chat_id");
            let dm_destination = match (dm_provider, dm_chat_id) {
                (Some(provider), Some(chat_id)) => {
                    ProviderKind::parse(&provider).map(|provider| DmDestination {
                        provider,
                        chat_id,
                    })
                }
                _ => None,
            };

            Account {
                id: row.get("id"),
                stream_id: row.get("stream_id"),
                channel_name: row.get("channel_name"),
                stream_url: row.get("stream_url"),
                template: row.get("template"),
                button_label: row.get("button_label"),
                dm_destination,
            }
        }))
    }
}
