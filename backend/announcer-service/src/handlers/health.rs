use actix_web::HttpResponse;
use serde_json::json;

use crate::metrics as app_metrics;

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

pub async fn metrics() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(app_metrics::render())
}
