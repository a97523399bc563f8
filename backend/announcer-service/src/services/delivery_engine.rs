//! Delivery engine.
//!
//! Executes one queued stream event end to end: resolves the account,
//! fans out to its destinations, and keeps the durable delivery log,
//! per-destination lock, and session registry consistent so that
//! replays of the same job converge instead of double-posting.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::models::{Account, Destination, EventKind, StreamEvent};
use crate::services::accounts::AccountResolver;
use crate::services::delivery_lock::{DeliveryLock, LockAcquire};
use crate::services::delivery_log::DeliveryLogStore;
use crate::services::destinations::DestinationStore;
use crate::services::event_queue::EventHandler;
use crate::services::providers::{OutgoingAnnouncement, ProviderRegistry};
use crate::services::renderer::AnnouncementRenderer;
use crate::services::session_registry::{session_id_for, SessionRegistry};
use crate::services::thumbnail::sanitize_thumbnail_url;

/// Job-level failure. Only transient provider failures raise; permanent
/// failures are absorbed per destination so the queue does not retry
/// work that can never succeed.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{failed}/{total} announcement deliveries failed (retryable)")]
    DeliveriesFailed { failed: usize, total: usize },

    #[error("{failed}/{total} announcement edits failed (retryable)")]
    UpdatesFailed { failed: usize, total: usize },

    #[error("{failed}/{total} announcement deletions failed (retryable)")]
    DeletionsFailed { failed: usize, total: usize },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Per-destination outcome of an online delivery attempt.
enum DeliveryOutcome {
    Delivered,
    AlreadyDelivered,
    /// Another worker holds the delivery lock; its log entry is the
    /// record of this destination being handled.
    Skipped,
    PermanentFailure,
    TransientFailure,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Recency window for resolving a deletable message when neither the
    /// destination pointer nor the session log has one.
    pub offline_lookup_window: ChronoDuration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            offline_lookup_window: ChronoDuration::hours(24),
        }
    }
}

pub struct DeliveryEngine {
    accounts: Arc<dyn AccountResolver>,
    destinations: Arc<dyn DestinationStore>,
    log: Arc<dyn DeliveryLogStore>,
    sessions: Arc<SessionRegistry>,
    locks: Arc<DeliveryLock>,
    providers: Arc<ProviderRegistry>,
    renderer: Arc<dyn AnnouncementRenderer>,
    settings: EngineSettings,
}

impl DeliveryEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accounts: Arc<dyn AccountResolver>,
        destinations: Arc<dyn DestinationStore>,
        log: Arc<dyn DeliveryLogStore>,
        sessions: Arc<SessionRegistry>,
        locks: Arc<DeliveryLock>,
        providers: Arc<ProviderRegistry>,
        renderer: Arc<dyn AnnouncementRenderer>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            accounts,
            destinations,
            log,
            sessions,
            locks,
            providers,
            renderer,
            settings,
        }
    }

    fn render_outgoing(&self, account: &Account, event: &StreamEvent) -> OutgoingAnnouncement {
        let rendered = self.renderer.render(account, event);
        let thumbnail = event
            .thumbnail_url
            .as_deref()
            .and_then(sanitize_thumbnail_url);
        OutgoingAnnouncement::from_rendered(rendered, thumbnail)
    }

    async fn handle_online(&self, event: &StreamEvent, job_id: &str) -> Result<(), EngineError> {
        let account = match self.accounts.account_by_stream_id(&event.stream_id).await? {
            Some(account) => account,
            None => {
                debug!(stream_id = %event.stream_id, "no account for stream, ignoring event");
                return Ok(());
            }
        };

        let session_id = session_id_for(&event.stream_id, event.started_at);
        self.sessions.store(&event.stream_id, &session_id).await?;

        let destinations = self.destinations.enabled_for_account(account.id).await?;
        let message = self.render_outgoing(&account, event);

        let total = destinations.len();
        let mut delivered = 0usize;
        let mut transient = 0usize;

        for destination in &destinations {
            match self
                .deliver_to_destination(destination, &session_id, &message, job_id)
                .await?
            {
                DeliveryOutcome::Delivered | DeliveryOutcome::AlreadyDelivered => delivered += 1,
                DeliveryOutcome::TransientFailure => transient += 1,
                DeliveryOutcome::Skipped | DeliveryOutcome::PermanentFailure => {}
            }
        }

        info!(
            stream_id = %event.stream_id,
            session_id = %session_id,
            delivered,
            total,
            "online announcement fan-out finished"
        );

        // Best-effort streamer summary, fired before any retryable raise
        // so the streamer hears about the first pass exactly once.
        if total > 0 {
            self.send_dm_summary(&account, &session_id, delivered, total)
                .await;
        }

        if transient > 0 {
            return Err(EngineError::DeliveriesFailed {
                failed: transient,
                total,
            });
        }
        Ok(())
    }

    async fn deliver_to_destination(
        &self,
        destination: &Destination,
        session_id: &str,
        message: &OutgoingAnnouncement,
        job_id: &str,
    ) -> Result<DeliveryOutcome, EngineError> {
        let provider = destination.provider.as_str();

        // Durable dedup: a replayed job edits the live message rather
        // than posting a second one.
        if let Some(existing) = self.log.sent_entry(destination.id, session_id).await? {
            match existing.message_id.as_deref() {
                Some(message_id) => {
                    return self.edit_delivered(destination, message_id, message).await;
                }
                None => {
                    // Sent row without a message id: a worker died between
                    // the insert and the provider ack. It cannot witness
                    // dedup, so drop it and send fresh.
                    debug!(entry_id = %existing.id, "removing stale sent entry without message id");
                    self.log.delete_entry(existing.id).await?;
                }
            }
        }

        match self
            .locks
            .acquire(destination.id, session_id, job_id)
            .await?
        {
            LockAcquire::Acquired | LockAcquire::HeldBySelf => {}
            LockAcquire::HeldByOther => {
                // Another job is delivering to this destination right
                // now; its log entry stands in for ours.
                debug!(destination_id = %destination.id, "delivery lock contended, skipping destination");
                return Ok(DeliveryOutcome::Skipped);
            }
        }

        // The other holder may have sent and logged between our dedup
        // check and the lock expiring into our hands. Its message is
        // live, so bring the content up to date rather than re-sending.
        if let Some(existing) = self.log.sent_entry(destination.id, session_id).await? {
            if let Some(message_id) = existing.message_id.as_deref() {
                return self.edit_delivered(destination, message_id, message).await;
            }
        }

        let client = match self.providers.resolve(destination) {
            Ok(client) => client,
            Err(e) => {
                self.log
                    .record_failed(destination.id, session_id, destination.provider, &e.to_string())
                    .await?;
                return if e.is_permanent() {
                    warn!(destination_id = %destination.id, error = %e, "provider permanently unavailable");
                    metrics::observe_delivery(provider, "permanent_failure");
                    Ok(DeliveryOutcome::PermanentFailure)
                } else {
                    metrics::observe_delivery(provider, "transient_failure");
                    Ok(DeliveryOutcome::TransientFailure)
                };
            }
        };

        match client.send_announcement(&destination.chat_id, message).await {
            Ok(message_id) => {
                self.log
                    .record_sent(destination.id, session_id, destination.provider, &message_id)
                    .await?;
                self.destinations
                    .mark_announced(destination.id, &message_id, Utc::now())
                    .await?;
                metrics::observe_delivery(provider, "sent");
                info!(
                    destination_id = %destination.id,
                    provider,
                    message_id = %message_id,
                    "announcement delivered"
                );
                Ok(DeliveryOutcome::Delivered)
            }
            Err(e) if e.is_permanent() => {
                // Bot kicked, chat gone, credentials revoked. Disable the
                // destination so the account stops accumulating failures.
                self.log
                    .record_failed(destination.id, session_id, destination.provider, &e.to_string())
                    .await?;
                self.destinations.disable(destination.id).await?;
                metrics::observe_delivery(provider, "permanent_failure");
                warn!(
                    destination_id = %destination.id,
                    provider,
                    error = %e,
                    "destination disabled after permanent provider error"
                );
                Ok(DeliveryOutcome::PermanentFailure)
            }
            Err(e) => {
                // Lock stays in place; our own retry re-enters it.
                self.log
                    .record_failed(destination.id, session_id, destination.provider, &e.to_string())
                    .await?;
                metrics::observe_delivery(provider, "transient_failure");
                warn!(
                    destination_id = %destination.id,
                    provider,
                    error = %e,
                    "transient provider error, delivery will be retried"
                );
                Ok(DeliveryOutcome::TransientFailure)
            }
        }
    }

    /// Bring an already-delivered announcement's content up to date.
    /// Permanent rejections leave the original message standing.
    async fn edit_delivered(
        &self,
        destination: &Destination,
        message_id: &str,
        message: &OutgoingAnnouncement,
    ) -> Result<DeliveryOutcome, EngineError> {
        let provider = destination.provider.as_str();
        let client = match self.providers.resolve(destination) {
            Ok(client) => client,
            Err(e) if e.is_permanent() => {
                warn!(destination_id = %destination.id, error = %e, "provider unavailable for edit");
                return Ok(DeliveryOutcome::AlreadyDelivered);
            }
            Err(_) => return Ok(DeliveryOutcome::TransientFailure),
        };

        match client
            .edit_announcement(&destination.chat_id, message_id, message)
            .await
        {
            Ok(()) => {
                metrics::observe_delivery(provider, "edited");
                Ok(DeliveryOutcome::AlreadyDelivered)
            }
            Err(e) if e.is_permanent() => {
                warn!(
                    destination_id = %destination.id,
                    message_id,
                    error = %e,
                    "edit of already-delivered announcement rejected"
                );
                Ok(DeliveryOutcome::AlreadyDelivered)
            }
            Err(e) => {
                warn!(destination_id = %destination.id, error = %e, "edit failed, will retry");
                Ok(DeliveryOutcome::TransientFailure)
            }
        }
    }

    /// One direct message to the account owner summarizing the fan-out.
    /// Strictly best effort: nothing in here, including a flaky flag
    /// store, may change the job's verdict. The notified flag is only
    /// set once the DM actually went out.
    async fn send_dm_summary(
        &self,
        account: &Account,
        session_id: &str,
        delivered: usize,
        total: usize,
    ) {
        let dm = match &account.dm_destination {
            Some(dm) => dm,
            None => return,
        };

        match self.sessions.was_notified(account.id, session_id).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                warn!(account_id = %account.id, error = %e, "dm summary skipped, notified flag unavailable");
                return;
            }
        }

        let client = match self.providers.resolve_kind(dm.provider, None) {
            Ok(client) => client,
            Err(e) => {
                warn!(account_id = %account.id, error = %e, "dm summary skipped, provider unavailable");
                return;
            }
        };

        let summary = self.renderer.render_summary(account, delivered, total);
        match client
            .send_announcement(&dm.chat_id, &OutgoingAnnouncement::text_only(summary))
            .await
        {
            Ok(_) => {
                if let Err(e) = self.sessions.mark_notified(account.id, session_id).await {
                    warn!(account_id = %account.id, error = %e, "dm summary sent but flag not recorded");
                }
                debug!(account_id = %account.id, session_id, "dm summary sent");
            }
            Err(e) => {
                warn!(account_id = %account.id, error = %e, "dm summary failed");
            }
        }
    }

    async fn handle_update(&self, event: &StreamEvent) -> Result<(), EngineError> {
        let account = match self.accounts.account_by_stream_id(&event.stream_id).await? {
            Some(account) => account,
            None => return Ok(()),
        };

        let session_id = match self.sessions.lookup(&event.stream_id).await? {
            Some(session_id) => session_id,
            None => {
                debug!(stream_id = %event.stream_id, "update for unknown session, ignoring");
                return Ok(());
            }
        };

        let entries = self
            .log
            .sent_entries_for_account(account.id, &session_id)
            .await?;
        let message = self.render_outgoing(&account, event);

        let mut total = 0usize;
        let mut failed = 0usize;
        for entry in &entries {
            let message_id = match entry.message_id.as_deref() {
                Some(id) => id,
                None => continue,
            };
            let destination = match self.destinations.by_id(entry.destination_id).await? {
                Some(destination) => destination,
                None => continue,
            };
            total += 1;

            let client = match self.providers.resolve(&destination) {
                Ok(client) => client,
                Err(e) if e.is_permanent() => {
                    warn!(destination_id = %destination.id, error = %e, "update skipped, provider unavailable");
                    continue;
                }
                Err(_) => {
                    failed += 1;
                    continue;
                }
            };

            match client
                .edit_announcement(&destination.chat_id, message_id, &message)
                .await
            {
                Ok(()) => metrics::observe_delivery(destination.provider.as_str(), "edited"),
                Err(e) if e.is_permanent() => {
                    warn!(
                        destination_id = %destination.id,
                        message_id,
                        error = %e,
                        "live announcement can no longer be edited"
                    );
                }
                Err(e) => {
                    warn!(destination_id = %destination.id, error = %e, "update edit failed, will retry");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(EngineError::UpdatesFailed { failed, total });
        }
        Ok(())
    }

    async fn handle_offline(&self, event: &StreamEvent) -> Result<(), EngineError> {
        let account = match self.accounts.account_by_stream_id(&event.stream_id).await? {
            Some(account) => account,
            None => return Ok(()),
        };

        let session_id = self.sessions.lookup(&event.stream_id).await?;
        // The session ends regardless of how cleanup below fares.
        self.sessions.remove(&event.stream_id).await?;

        let destinations = self
            .destinations
            .delete_after_end_for_account(account.id)
            .await?;

        let mut total = 0usize;
        let mut failed = 0usize;
        for destination in &destinations {
            let message_id = match self
                .resolve_deletable_message(destination, session_id.as_deref())
                .await?
            {
                Some(id) => id,
                None => {
                    debug!(destination_id = %destination.id, "no announcement to delete");
                    continue;
                }
            };
            total += 1;

            let client = match self.providers.resolve(destination) {
                Ok(client) => client,
                Err(e) if e.is_permanent() => {
                    warn!(destination_id = %destination.id, error = %e, "deletion skipped, provider unavailable");
                    continue;
                }
                Err(_) => {
                    failed += 1;
                    continue;
                }
            };

            match client
                .delete_message(&destination.chat_id, &message_id)
                .await
            {
                Ok(()) => {
                    self.finish_deletion(destination, &message_id).await?;
                    metrics::observe_delivery(destination.provider.as_str(), "deleted");
                }
                Err(e) if e.is_permanent() => {
                    // Already gone or permanently out of reach; record the
                    // outcome so replays stop retrying it.
                    warn!(
                        destination_id = %destination.id,
                        message_id = %message_id,
                        error = %e,
                        "announcement deletion rejected by provider"
                    );
                    self.finish_deletion(destination, &message_id).await?;
                }
                Err(e) => {
                    warn!(destination_id = %destination.id, error = %e, "deletion failed, will retry");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(EngineError::DeletionsFailed { failed, total });
        }
        Ok(())
    }

    /// Which message to take down: the destination's live pointer, then
    /// the exact session's log entry, then the latest sent message
    /// inside the recency window.
    async fn resolve_deletable_message(
        &self,
        destination: &Destination,
        session_id: Option<&str>,
    ) -> Result<Option<String>, EngineError> {
        if let Some(id) = &destination.last_message_id {
            return Ok(Some(id.clone()));
        }

        if let Some(session_id) = session_id {
            if let Some(entry) = self.log.sent_entry(destination.id, session_id).await? {
                if let Some(id) = entry.message_id {
                    return Ok(Some(id));
                }
            }
        }

        let recent = self
            .log
            .latest_sent_within(destination.id, self.settings.offline_lookup_window)
            .await?;
        Ok(recent.and_then(|entry| entry.message_id))
    }

    async fn finish_deletion(
        &self,
        destination: &Destination,
        message_id: &str,
    ) -> Result<(), EngineError> {
        self.log.mark_deleted(destination.id, message_id).await?;
        if destination.last_message_id.as_deref() == Some(message_id) {
            self.destinations.clear_last_message(destination.id).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for DeliveryEngine {
    async fn handle(&self, event: &StreamEvent, job_id: &str) -> anyhow::Result<()> {
        match event.kind {
            EventKind::Online => self.handle_online(event, job_id).await?,
            EventKind::Update => self.handle_update(event).await?,
            EventKind::Offline => self.handle_offline(event).await?,
        }
        Ok(())
    }
}
