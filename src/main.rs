mod config;
mod db;
mod error;
mod http;
mod mirror;
mod models;
mod processor;
mod store;

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use config::{AppConfig, StoreBackend};
use db::DbPool;
use mirror::{MirrorHandle, MirrorOptions};
use store::{LocationStore, MemoryLocationStore, PgLocationStore};
use tracing::{info, warn};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Bus Tracker Service...");

    // Init store
    let (store, pool): (Arc<dyn LocationStore>, Option<DbPool>) = match config.store_backend {
        StoreBackend::Postgres => {
            let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;
            info!("Connected to database");
            db::ensure_schema(&pool).await?;
            (Arc::new(PgLocationStore::new(pool.clone())), Some(pool))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; locations are lost on exit");
            (Arc::new(MemoryLocationStore::new()), None)
        }
    };

    // Mirror
    let mirror = MirrorHandle::new(
        config.mirror.clone(),
        MirrorOptions {
            request_timeout: Duration::from_secs(config.mirror_timeout_secs),
            max_retries: config.mirror_max_retries,
            cooldown: Duration::from_secs(config.mirror_cooldown_secs),
            ..MirrorOptions::default()
        },
    );
    if config.mirror.is_none() {
        info!("No mirror configured at startup");
    } else if config.mirror_auto_init {
        if let Err(e) = mirror.initialize(store.clone(), None).await {
            warn!("Mirror auto-initialization failed, continuing without it: {}", e);
        }
        info!("Mirror state after auto-initialization: {:?}", mirror.state());
    }

    let state = web::Data::new(http::AppState {
        store,
        mirror: mirror.clone(),
        settings: config.service.clone(),
    });

    let mut server = HttpServer::new(move || App::new().app_data(state.clone()).configure(http::configure));
    if let Some(workers) = config.http_workers {
        server = server.workers(workers);
    }

    info!("Listening on {}:{}", config.http_host, config.http_port);
    server
        .bind((config.http_host.as_str(), config.http_port))?
        .run()
        .await?;

    info!("HTTP server stopped");
    mirror.shutdown().await;
    if let Some(pool) = pool {
        pool.close().await;
    }
    info!("Shutdown complete");

    Ok(())
}
