use actix_web::{web, HttpResponse};
use serde::Serialize;

use crate::error::AppError;
use crate::models::StreamEvent;
use crate::state::AppState;

#[derive(Serialize)]
struct IngestResponse {
    job_id: String,
    queued: bool,
}

/// Accepts one upstream stream lifecycle event and queues it for
/// asynchronous delivery. Redundant deliveries of the same logical
/// event are coalesced and reported as `queued: false`.
pub async fn ingest_event(
    state: web::Data<AppState>,
    payload: web::Json<StreamEvent>,
) -> Result<HttpResponse, AppError> {
    let event = payload.into_inner();
    if event.stream_id.trim().is_empty() {
        return Err(AppError::Validation("stream_id must not be empty".into()));
    }

    let job_id = event.job_id();
    let queued = state.queue.enqueue(event).await;

    Ok(HttpResponse::Accepted().json(IngestResponse { job_id, queued }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;
    use crate::services::{EventHandler, EventQueue, QueueConfig};
    use actix_web::{test, App};
    use async_trait::async_trait;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;

    struct NoopHandler;

    #[async_trait]
    impl EventHandler for NoopHandler {
        async fn handle(&self, _event: &StreamEvent, _job_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn test_state() -> AppState {
        AppState {
            db: PgPoolOptions::new().connect_lazy("postgres://localhost/unused").unwrap(),
            queue: Arc::new(EventQueue::new(Arc::new(NoopHandler), QueueConfig::default())),
        }
    }

    #[actix_web::test]
    async fn test_ingest_accepts_event() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state()))
                .route("/internal/stream-events", web::post().to(ingest_event)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/internal/stream-events")
            .set_json(serde_json::json!({
                "kind": "online",
                "stream_id": "ch-1",
                "title": "First stream",
                "category": null,
                "thumbnail_url": null,
                "started_at": "2026-08-29T12:00:00Z",
                "viewer_count": 3
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::ACCEPTED);
    }

    #[actix_web::test]
    async fn test_ingest_rejects_blank_stream_id() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state()))
                .route("/internal/stream-events", web::post().to(ingest_event)),
        )
        .await;

        let event = StreamEvent {
            kind: EventKind::Online,
            stream_id: "  ".to_string(),
            title: None,
            category: None,
            thumbnail_url: None,
            started_at: None,
            viewer_count: None,
        };
        let req = test::TestRequest::post()
            .uri("/internal/stream-events")
            .set_json(&event)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }
}
