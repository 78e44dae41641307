use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// Emit JSON logs instead of pretty output.
    pub json_logs: bool,

    /// Upper bound on pooled database connections.
    pub db_max_connections: u32,

    // =========================
    // Registry configuration
    // =========================
    /// Maximum count of OR numbers a single batch may span.
    ///
    /// Items are created in bulk when the batch is created, so this bounds
    /// the size of that insert and the memory held per batch.
    pub max_batch_size: u64,

    /// Storage calls slower than this (milliseconds) are logged as warnings.
    pub slow_storage_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://cashiering_dev.db".to_string(),
            json_logs: false,
            db_max_connections: 8,
            max_batch_size: 100_000,
            slow_storage_ms: 100,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let database_url = std::env::var("DATABASE_URL").unwrap_or(defaults.database_url);
        let json_logs = std::env::var("APP_ENV").unwrap_or_default() == "production";

        Self {
            database_url,
            json_logs,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", defaults.db_max_connections),
            max_batch_size: env_or("OR_MAX_BATCH_SIZE", defaults.max_batch_size),
            slow_storage_ms: env_or("SLOW_STORAGE_MS", defaults.slow_storage_ms),
        }
    }
}

/// Reads a numeric variable; malformed values fall back to `default`.
fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, raw = %raw, fallback = %default, "ignoring malformed config value");
                default
            }
        },
        Err(_) => default,
    }
}
