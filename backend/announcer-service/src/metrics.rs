use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

pub static DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "announcer_deliveries_total",
        "Announcement delivery attempts by provider and outcome",
        &["provider", "outcome"]
    )
    .expect("metric registered once")
});

pub static QUEUE_JOBS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "announcer_queue_jobs_total",
        "Event queue jobs by kind and outcome",
        &["kind", "outcome"]
    )
    .expect("metric registered once")
});

pub fn observe_delivery(provider: &str, outcome: &str) {
    DELIVERIES_TOTAL.with_label_values(&[provider, outcome]).inc();
}

pub fn observe_queue_job(kind: &str, outcome: &str) {
    QUEUE_JOBS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

/// Text exposition of the default registry.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        observe_delivery("telegram", "sent");
        observe_queue_job("online", "enqueued");
        let text = render();
        assert!(text.contains("announcer_deliveries_total"));
        assert!(text.contains("announcer_queue_jobs_total"));
    }
}
