//! Server configuration.
//!
//! Centralizes environment variable parsing with defaults for local
//! development. The LLM adapter reads its own `LLM_*` variables.

use std::time::Duration;

pub const DEV_JWT_SECRET: &str = "tutorboard_local_development_jwt_secret_32+";

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GC_INTERVAL_MS: u64 = 10_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_STALE_MS: u64 = 60_000;
const DEFAULT_OUTBOX_CAPACITY: usize = 256;
const DEFAULT_SNAPSHOT_PAGE_LIMIT_MAX: i64 = 500;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// Postgres connection string. `None` selects the in-memory stores.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    /// Substitute a synthetic user when token verification fails. Only ever
    /// true when `APP_ENV=development`.
    pub dev_auth_fallback: bool,
    pub gc_interval: Duration,
    pub heartbeat_interval: Duration,
    pub stale_after: Duration,
    pub outbox_capacity: usize,
    pub snapshot_page_limit_max: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            jwt_secret: DEV_JWT_SECRET.to_owned(),
            dev_auth_fallback: false,
            gc_interval: Duration::from_millis(DEFAULT_GC_INTERVAL_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            stale_after: Duration::from_millis(DEFAULT_STALE_MS),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            snapshot_page_limit_max: DEFAULT_SNAPSHOT_PAGE_LIMIT_MAX,
        }
    }
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `PORT` | `3000` |
    /// | `DATABASE_URL` | *(none, in-memory stores)* |
    /// | `DB_MAX_CONNECTIONS` | `5` |
    /// | `AUTH_JWT_SECRET` | dev-only placeholder |
    /// | `APP_ENV` | `production` |
    /// | `AUTH_DEV_FALLBACK` | `false`, ignored unless `APP_ENV=development` |
    /// | `EPHEMERAL_GC_INTERVAL_MS` | `10000` |
    /// | `HEARTBEAT_INTERVAL_MS` | `30000` |
    /// | `CONNECTION_STALE_MS` | `60000` |
    /// | `CONNECTION_OUTBOX_CAPACITY` | `256` |
    /// | `SNAPSHOT_PAGE_LIMIT_MAX` | `500` |
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let parse_or = |key: &str, default: u64| -> u64 {
            env(key)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let is_development = env("APP_ENV").is_ok_and(|v| v.trim().eq_ignore_ascii_case("development"));
        let fallback_requested = env("AUTH_DEV_FALLBACK")
            .ok()
            .and_then(|v| parse_bool(&v))
            .unwrap_or(false);

        Self {
            port: env("PORT")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_PORT),
            database_url: env("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            db_max_connections: env("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
            jwt_secret: env("AUTH_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.to_owned()),
            dev_auth_fallback: is_development && fallback_requested,
            gc_interval: Duration::from_millis(parse_or("EPHEMERAL_GC_INTERVAL_MS", DEFAULT_GC_INTERVAL_MS)),
            heartbeat_interval: Duration::from_millis(parse_or("HEARTBEAT_INTERVAL_MS", DEFAULT_HEARTBEAT_INTERVAL_MS)),
            stale_after: Duration::from_millis(parse_or("CONNECTION_STALE_MS", DEFAULT_STALE_MS)),
            outbox_capacity: env("CONNECTION_OUTBOX_CAPACITY")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .filter(|cap| *cap > 0)
                .unwrap_or(DEFAULT_OUTBOX_CAPACITY),
            snapshot_page_limit_max: env("SNAPSHOT_PAGE_LIMIT_MAX")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .filter(|max| *max > 0)
                .unwrap_or(DEFAULT_SNAPSHOT_PAGE_LIMIT_MAX),
        }
    }

    /// Returns true when using the development-only JWT secret.
    #[must_use]
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(map: HashMap<&'static str, &'static str>) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| {
            map.get(key)
                .map(|v| (*v).to_string())
                .ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = ServerConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(cfg, ServerConfig::default());
        assert!(cfg.is_dev_jwt_secret());
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.gc_interval, Duration::from_secs(10));
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.stale_after, Duration::from_secs(60));
    }

    #[test]
    fn reads_overrides() {
        let cfg = ServerConfig::from_env_fn(env_from_map(HashMap::from([
            ("PORT", "8081"),
            ("DATABASE_URL", "postgres://localhost/tutor"),
            ("AUTH_JWT_SECRET", "another_secret_that_is_long_enough_for_hs256"),
            ("EPHEMERAL_GC_INTERVAL_MS", "250"),
            ("CONNECTION_STALE_MS", "1000"),
            ("CONNECTION_OUTBOX_CAPACITY", "16"),
        ])));
        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/tutor"));
        assert!(!cfg.is_dev_jwt_secret());
        assert_eq!(cfg.gc_interval, Duration::from_millis(250));
        assert_eq!(cfg.stale_after, Duration::from_millis(1000));
        assert_eq!(cfg.outbox_capacity, 16);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let cfg = ServerConfig::from_env_fn(env_from_map(HashMap::from([
            ("PORT", "not-a-port"),
            ("HEARTBEAT_INTERVAL_MS", "soon"),
            ("CONNECTION_OUTBOX_CAPACITY", "0"),
        ])));
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.heartbeat_interval, Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS));
        assert_eq!(cfg.outbox_capacity, DEFAULT_OUTBOX_CAPACITY);
    }

    #[test]
    fn dev_fallback_requires_development_env() {
        let prod = ServerConfig::from_env_fn(env_from_map(HashMap::from([("AUTH_DEV_FALLBACK", "true")])));
        assert!(!prod.dev_auth_fallback);

        let dev = ServerConfig::from_env_fn(env_from_map(HashMap::from([
            ("AUTH_DEV_FALLBACK", "yes"),
            ("APP_ENV", "Development"),
        ])));
        assert!(dev.dev_auth_fallback);
    }

    #[test]
    fn blank_database_url_means_memory() {
        let cfg = ServerConfig::from_env_fn(env_from_map(HashMap::from([("DATABASE_URL", "  ")])));
        assert!(cfg.database_url.is_none());
    }
}
