use anyhow::{bail, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

use crate::mirror::MirrorSettings;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown STORE_BACKEND '{}', expected 'postgres' or 'memory'", other),
        }
    }
}

/// Request-facing defaults shared by the HTTP handlers.
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceSettings {
    pub default_bus_id: String,
    pub history_default_limit: i64,
    pub history_max_limit: i64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            default_bus_id: "bus_001".to_string(),
            history_default_limit: 50,
            history_max_limit: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub http_host: String,
    pub http_port: u16,
    pub http_workers: Option<usize>,
    pub store_backend: StoreBackend,
    pub database_url: String,
    pub db_max_connections: u32,
    pub service: ServiceSettings,
    pub mirror: Option<MirrorSettings>,
    pub mirror_auto_init: bool,
    pub mirror_timeout_secs: u64,
    pub mirror_max_retries: u32,
    pub mirror_cooldown_secs: u64,
    pub log_level: String,
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn flag(key: &str) -> bool {
    matches!(
        env::var(key).map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Ok("1" | "true" | "yes" | "on")
    )
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let http_host = env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let http_port = parsed_or("HTTP_PORT", 8000);
        let http_workers = non_empty("HTTP_WORKERS").and_then(|v| v.parse().ok());

        let store_backend = match non_empty("STORE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => StoreBackend::Postgres,
        };

        let database_url = match non_empty("DATABASE_URL") {
            Some(url) => url,
            None => {
                let db_host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
                let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
                let db_name = env::var("DB_DATABASE").unwrap_or_else(|_| "bus_tracker".to_string());
                let db_user = env::var("DB_USER").unwrap_or_else(|_| "tracker".to_string());
                let db_pwd = env::var("DB_PWD").unwrap_or_else(|_| "tracker".to_string());
                format!(
                    "postgres://{}:{}@{}:{}/{}",
                    db_user, db_pwd, db_host, db_port, db_name
                )
            }
        };
        let db_max_connections = parsed_or("DB_MAX_CONNECTIONS", 20);

        let defaults = ServiceSettings::default();
        let default_bus_id = non_empty("DEFAULT_BUS_ID").unwrap_or(defaults.default_bus_id);
        let history_max_limit = parsed_or("HISTORY_MAX_LIMIT", defaults.history_max_limit).max(1);
        let history_default_limit = parsed_or("HISTORY_DEFAULT_LIMIT", defaults.history_default_limit)
            .clamp(1, history_max_limit);

        let mirror = non_empty("MIRROR_DATABASE_URL").map(|database_url| MirrorSettings {
            database_url,
            auth_token: non_empty("MIRROR_AUTH_TOKEN"),
            bus_id: non_empty("MIRROR_BUS_ID").unwrap_or_else(|| default_bus_id.clone()),
        });

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            http_host,
            http_port,
            http_workers,
            store_backend,
            database_url,
            db_max_connections,
            service: ServiceSettings {
                default_bus_id,
                history_default_limit,
                history_max_limit,
            },
            mirror,
            mirror_auto_init: flag("MIRROR_AUTO_INIT"),
            mirror_timeout_secs: parsed_or("MIRROR_TIMEOUT_SECS", 5).max(1),
            mirror_max_retries: parsed_or("MIRROR_MAX_RETRIES", 5).max(1),
            mirror_cooldown_secs: parsed_or("MIRROR_COOLDOWN_SECS", 60),
            log_level,
        })
    }
}
