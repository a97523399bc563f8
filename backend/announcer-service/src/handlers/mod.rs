pub mod events;
pub mod health;

use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::health))
        .route("/metrics", web::get().to(health::metrics))
        .route(
            "/internal/stream-events",
            web::post().to(events::ingest_event),
        );
}
