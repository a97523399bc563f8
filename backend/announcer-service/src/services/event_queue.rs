//! In-process event queue.
//!
//! At-least-once invocation of the delivery engine per accepted job,
//! with per-kind dispatch priority (online first), deterministic
//! job-identity coalescing, exponential backoff with jitter on retry,
//! a fixed attempt ceiling, a bounded worker pool, and a global rate
//! limiter to respect provider limits.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand::Rng;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::models::{EventKind, StreamEvent};

/// Handles one dequeued event job. An `Err` return asks the queue to
/// retry after backoff.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &StreamEvent, job_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Bounded worker pool size
    pub workers: usize,
    /// Total attempts per job before it is abandoned
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
    /// Global job throughput cap
    pub rate_limit_per_sec: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
            rate_limit_per_sec: 20,
        }
    }
}

/// Online announcements beat update/offline cleanup for dispatch order.
fn priority_for(kind: EventKind) -> u8 {
    match kind {
        EventKind::Online => 200,
        EventKind::Update | EventKind::Offline => 100,
    }
}

/// Backoff before retry `attempt` (1-based over completed attempts).
fn backoff_for(config: &QueueConfig, attempt: u32) -> Duration {
    let exp = config.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
    let base = (config.initial_backoff.as_millis() as f64 * exp)
        .min(config.max_backoff.as_millis() as f64);
    if config.jitter {
        let factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
        Duration::from_millis((base * factor).max(0.0) as u64)
    } else {
        Duration::from_millis(base as u64)
    }
}

struct Job {
    job_id: String,
    event: StreamEvent,
    /// Completed attempts so far
    attempt: u32,
}

struct ReadyJob {
    priority: u8,
    seq: u64,
    job: Job,
}

impl Eq for ReadyJob {}

impl PartialEq for ReadyJob {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Ord for ReadyJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; same priority pops FIFO
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

impl PartialOrd for ReadyJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct DelayedJob {
    run_at: Instant,
    priority: u8,
    job: Job,
}

struct QueueState {
    ready: BinaryHeap<ReadyJob>,
    delayed: Vec<DelayedJob>,
    /// Job ids currently queued or running, for coalescing
    active: HashSet<String>,
    seq: u64,
    shutdown: bool,
}

pub struct EventQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    limiter: Arc<DefaultDirectRateLimiter>,
    handler: Arc<dyn EventHandler>,
    config: QueueConfig,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EventQueue {
    pub fn new(handler: Arc<dyn EventHandler>, config: QueueConfig) -> Self {
        let per_sec = NonZeroU32::new(config.rate_limit_per_sec.max(1))
            .unwrap_or_else(|| NonZeroU32::new(1).expect("1 is non-zero"));
        Self {
            state: Arc::new(Mutex::new(QueueState {
                ready: BinaryHeap::new(),
                delayed: Vec::new(),
                active: HashSet::new(),
                seq: 0,
                shutdown: false,
            })),
            notify: Arc::new(Notify::new()),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_sec))),
            handler,
            config,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Accept an event. Returns false when an identical logical event
    /// is already queued or running (redundant webhook delivery).
    pub async fn enqueue(&self, event: StreamEvent) -> bool {
        let job_id = event.job_id();
        let kind = event.kind;

        let mut state = self.state.lock().await;
        if !state.active.insert(job_id.clone()) {
            debug!(job_id = %job_id, "duplicate event coalesced");
            metrics::observe_queue_job(kind.as_str(), "coalesced");
            return false;
        }

        state.seq += 1;
        let seq = state.seq;
        state.ready.push(ReadyJob {
            priority: priority_for(kind),
            seq,
            job: Job {
                job_id: job_id.clone(),
                event,
                attempt: 0,
            },
        });
        drop(state);

        debug!(job_id = %job_id, "event enqueued");
        metrics::observe_queue_job(kind.as_str(), "enqueued");
        self.notify.notify_one();
        true
    }

    /// Spawn the worker pool.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        for _ in 0..self.config.workers {
            let state = self.state.clone();
            let notify = self.notify.clone();
            let limiter = self.limiter.clone();
            let handler = self.handler.clone();
            let config = self.config.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(state, notify, limiter, handler, config).await;
            }));
        }
    }

    /// Stop accepting work and let idle workers exit; in-flight jobs
    /// run to completion.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().await;
            state.shutdown = true;
        }
        self.notify.notify_waiters();
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    limiter: Arc<DefaultDirectRateLimiter>,
    handler: Arc<dyn EventHandler>,
    config: QueueConfig,
) {
    loop {
        let job = match next_job(&state, &notify).await {
            Some(job) => job,
            None => return,
        };

        limiter.until_ready().await;

        let attempt = job.attempt + 1;
        match handler.handle(&job.event, &job.job_id).await {
            Ok(()) => {
                info!(job_id = %job.job_id, attempt, "event job completed");
                metrics::observe_queue_job(job.event.kind.as_str(), "completed");
                state.lock().await.active.remove(&job.job_id);
            }
            Err(e) if attempt >= config.max_attempts => {
                // Operator-visible failure channel; the job is done retrying
                error!(
                    job_id = %job.job_id,
                    attempts = attempt,
                    error = %e,
                    "event job abandoned after attempt ceiling"
                );
                metrics::observe_queue_job(job.event.kind.as_str(), "abandoned");
                state.lock().await.active.remove(&job.job_id);
            }
            Err(e) => {
                let delay = backoff_for(&config, attempt);
                warn!(
                    job_id = %job.job_id,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "event job failed, retrying after backoff"
                );
                metrics::observe_queue_job(job.event.kind.as_str(), "retried");
                let priority = priority_for(job.event.kind);
                let mut st = state.lock().await;
                st.delayed.push(DelayedJob {
                    run_at: Instant::now() + delay,
                    priority,
                    job: Job {
                        attempt,
                        ..job
                    },
                });
                drop(st);
                notify.notify_one();
            }
        }
    }
}

/// Pop the next runnable job, promoting due retries first. Returns
/// None on shutdown.
async fn next_job(state: &Arc<Mutex<QueueState>>, notify: &Arc<Notify>) -> Option<Job> {
    loop {
        let next_wake;
        {
            let mut st = state.lock().await;
            if st.shutdown {
                return None;
            }

            let now = Instant::now();
            let mut i = 0;
            while i < st.delayed.len() {
                if st.delayed[i].run_at <= now {
                    let due = st.delayed.swap_remove(i);
                    st.seq += 1;
                    let seq = st.seq;
                    st.ready.push(ReadyJob {
                        priority: due.priority,
                        seq,
                        job: due.job,
                    });
                } else {
                    i += 1;
                }
            }

            if let Some(ready) = st.ready.pop() {
                return Some(ready.job);
            }
            next_wake = st.delayed.iter().map(|d| d.run_at).min();
        }

        match next_wake {
            Some(deadline) => {
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = sleep_until(deadline) => {}
                }
            }
            None => notify.notified().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    fn event(kind: EventKind, stream_id: &str) -> StreamEvent {
        StreamEvent {
            kind,
            stream_id: stream_id.to_string(),
            title: None,
            category: None,
            thumbnail_url: None,
            started_at: None,
            viewer_count: None,
        }
    }

    fn test_config() -> QueueConfig {
        QueueConfig {
            workers: 1,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter: false,
            rate_limit_per_sec: 1000,
        }
    }

    struct RecordingHandler {
        calls: Mutex<Vec<String>>,
        failures_remaining: AtomicU32,
    }

    impl RecordingHandler {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                failures_remaining: AtomicU32::new(failures),
            })
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, _event: &StreamEvent, job_id: &str) -> anyhow::Result<()> {
            self.calls.lock().await.push(job_id.to_string());
            if self
                .failures_remaining
                .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| {
                    n.checked_sub(1)
                })
                .is_ok()
            {
                anyhow::bail!("simulated transient failure");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_jobs_run_to_completion() {
        let handler = RecordingHandler::new(0);
        let queue = EventQueue::new(handler.clone(), test_config());
        assert!(queue.enqueue(event(EventKind::Online, "ch-1")).await);
        assert!(queue.enqueue(event(EventKind::Offline, "ch-2")).await);
        queue.start().await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.calls.lock().await.len(), 2);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_events_coalesce() {
        let handler = RecordingHandler::new(0);
        let queue = EventQueue::new(handler.clone(), test_config());
        assert!(queue.enqueue(event(EventKind::Online, "ch-1")).await);
        assert!(!queue.enqueue(event(EventKind::Online, "ch-1")).await);
        queue.start().await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.calls.lock().await.len(), 1);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_online_dispatches_before_offline() {
        let handler = RecordingHandler::new(0);
        let queue = EventQueue::new(handler.clone(), test_config());
        // Enqueued before the single worker starts, so ordering is pure
        // priority
        queue.enqueue(event(EventKind::Offline, "ch-1")).await;
        queue.enqueue(event(EventKind::Online, "ch-2")).await;
        queue.start().await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        let calls = handler.calls.lock().await;
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("online:"));
        assert!(calls[1].starts_with("offline:"));
        drop(calls);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_after_transient_failure() {
        let handler = RecordingHandler::new(1);
        let queue = EventQueue::new(handler.clone(), test_config());
        queue.enqueue(event(EventKind::Online, "ch-1")).await;
        queue.start().await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handler.calls.lock().await.len(), 2);
        // Completed: the same logical event is accepted again
        assert!(queue.enqueue(event(EventKind::Online, "ch-1")).await);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_abandoned_after_attempt_ceiling() {
        let handler = RecordingHandler::new(u32::MAX);
        let queue = EventQueue::new(handler.clone(), test_config());
        queue.enqueue(event(EventKind::Online, "ch-1")).await;
        queue.start().await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        // max_attempts = 3: exactly three invocations, then abandoned
        assert_eq!(handler.calls.lock().await.len(), 3);
        assert!(queue.enqueue(event(EventKind::Online, "ch-1")).await);
        queue.shutdown().await;
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let config = test_config();
        assert_eq!(backoff_for(&config, 1), Duration::from_millis(10));
        assert_eq!(backoff_for(&config, 2), Duration::from_millis(20));
        assert_eq!(backoff_for(&config, 3), Duration::from_millis(40));
        // Capped at max_backoff
        assert_eq!(backoff_for(&config, 10), Duration::from_millis(50));
    }

    #[test]
    fn test_priority_values() {
        assert!(priority_for(EventKind::Online) > priority_for(EventKind::Offline));
        assert_eq!(
            priority_for(EventKind::Update),
            priority_for(EventKind::Offline)
        );
    }
}
