use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use chrono::Duration as ChronoDuration;
use sqlx::postgres::PgPoolOptions;

use announcer_service::config::Config;
use announcer_service::services::accounts::PgAccountResolver;
use announcer_service::services::delivery_lock::DeliveryLock;
use announcer_service::services::delivery_log::PgDeliveryLogStore;
use announcer_service::services::destinations::PgDestinationStore;
use announcer_service::services::providers::{
    DiscordClient, ProviderClient, ProviderRegistry, TelegramClient,
};
use announcer_service::services::renderer::TemplateRenderer;
use announcer_service::services::session_registry::SessionRegistry;
use announcer_service::services::{DeliveryEngine, EngineSettings, EventQueue, QueueConfig};
use announcer_service::state::AppState;
use announcer_service::{handlers, logging, migrations};
use redis_utils::{RedisKvStore, RedisPool};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    let cfg = Config::from_env();

    let db = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.url)
        .await?;

    // Schema must be in sync before any job runs
    migrations::run_all(&db).await?;

    let redis_pool = RedisPool::connect(&cfg.redis.url).await?;
    let kv = Arc::new(RedisKvStore::new(redis_pool.manager()));

    let http_timeout = Duration::from_secs(cfg.providers.http_timeout_secs);
    let telegram: Option<Arc<dyn ProviderClient>> = cfg
        .providers
        .telegram_bot_token
        .clone()
        .map(|token| Arc::new(TelegramClient::new(token, http_timeout)) as Arc<dyn ProviderClient>);
    let discord: Option<Arc<dyn ProviderClient>> = cfg
        .providers
        .discord_bot_token
        .clone()
        .map(|token| Arc::new(DiscordClient::new(token, http_timeout)) as Arc<dyn ProviderClient>);
    if telegram.is_none() && discord.is_none() {
        tracing::warn!("no provider tokens configured; every delivery will be retried until abandoned");
    }

    let engine = Arc::new(DeliveryEngine::new(
        Arc::new(PgAccountResolver::new(db.clone())),
        Arc::new(PgDestinationStore::new(db.clone())),
        Arc::new(PgDeliveryLogStore::new(db.clone())),
        Arc::new(SessionRegistry::new(
            kv.clone(),
            cfg.delivery.session_ttl(),
            cfg.delivery.notified_ttl(),
        )),
        Arc::new(DeliveryLock::new(kv.clone(), cfg.delivery.lock_ttl())),
        Arc::new(ProviderRegistry::new(telegram, discord)),
        Arc::new(TemplateRenderer),
        EngineSettings {
            offline_lookup_window: ChronoDuration::hours(cfg.delivery.offline_lookup_window_hours),
        },
    ));

    let queue = Arc::new(EventQueue::new(
        engine,
        QueueConfig {
            workers: cfg.queue.workers,
            max_attempts: cfg.queue.max_attempts,
            initial_backoff: Duration::from_millis(cfg.queue.initial_backoff_ms),
            max_backoff: Duration::from_millis(cfg.queue.max_backoff_ms),
            backoff_multiplier: 2.0,
            jitter: true,
            rate_limit_per_sec: cfg.queue.rate_limit_per_sec,
        },
    ));
    queue.start().await;

    let state = AppState {
        db: db.clone(),
        queue: queue.clone(),
    };

    let bind_addr = format!("{}:{}", cfg.app.host, cfg.app.port);
    tracing::info!(%bind_addr, env = %cfg.app.env, "starting announcer-service");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(handlers::configure_routes)
    })
    .bind(&bind_addr)?
    .run()
    .await?;

    queue.shutdown().await;
    Ok(())
}
