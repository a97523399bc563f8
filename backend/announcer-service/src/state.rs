use std::sync::Arc;

use sqlx::PgPool;

use crate::services::EventQueue;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<EventQueue>,
}
