//! Service configuration read from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::audit::AuditPipelineConfig;
use crate::utils::CircuitBreakerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}: expected {expected}")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSinkKind {
    Log,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL; required when any component uses Postgres
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub storage_backend: StorageBackend,
    /// JSON file backing the memory store
    pub storage_path: Option<PathBuf>,
    pub cache_backend: CacheBackend,
    pub redis_url: String,
    pub cache_namespace: String,
    /// Zero means cache values never expire
    pub cache_ttl: Duration,
    /// Consecutive Redis failures before the cache breaker opens
    pub cache_breaker_failures: u32,
    pub cache_breaker_cooldown: Duration,
    pub audit_sink: AuditSinkKind,
    pub audit_batchers: usize,
    pub audit_persisters: usize,
    pub audit_queue_capacity: usize,
    pub metrics_port: u16,
    /// Run the scripted lifecycle demo after startup
    pub demo: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            database_url: var("DATABASE_URL"),
            db_max_connections: parse(&var, "DB_MAX_CONNECTIONS", 10, "a positive integer")?,
            storage_backend: match var("STORAGE_BACKEND").as_deref() {
                None | Some("memory") => StorageBackend::Memory,
                Some("postgres") => StorageBackend::Postgres,
                Some(other) => return Err(invalid("STORAGE_BACKEND", other, "postgres | memory")),
            },
            storage_path: var("STORAGE_PATH").map(PathBuf::from),
            cache_backend: match var("CACHE_BACKEND").as_deref() {
                None | Some("memory") => CacheBackend::Memory,
                Some("redis") => CacheBackend::Redis,
                Some(other) => return Err(invalid("CACHE_BACKEND", other, "redis | memory")),
            },
            redis_url: var("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".into()),
            cache_namespace: var("CACHE_NAMESPACE").unwrap_or_else(|| "pickup".into()),
            cache_ttl: Duration::from_secs(parse(&var, "CACHE_TTL_SECS", 0, "seconds")?),
            cache_breaker_failures: parse(&var, "CACHE_BREAKER_FAILURES", 5, "a positive integer")?,
            cache_breaker_cooldown: Duration::from_secs(parse(
                &var,
                "CACHE_BREAKER_COOLDOWN_SECS",
                30,
                "seconds",
            )?),
            audit_sink: match var("AUDIT_SINK").as_deref() {
                None | Some("log") => AuditSinkKind::Log,
                Some("postgres") => AuditSinkKind::Postgres,
                Some(other) => return Err(invalid("AUDIT_SINK", other, "log | postgres")),
            },
            audit_batchers: parse(&var, "AUDIT_BATCHERS", 2, "a positive integer")?,
            audit_persisters: parse(&var, "AUDIT_PERSISTERS", 2, "a positive integer")?,
            audit_queue_capacity: parse(&var, "AUDIT_QUEUE_CAPACITY", 5, "a positive integer")?,
            metrics_port: parse(&var, "METRICS_PORT", 9090, "a port number")?,
            demo: parse(&var, "PICKUP_DEMO", false, "true | false")?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let needs_postgres =
            self.storage_backend == StorageBackend::Postgres || self.audit_sink == AuditSinkKind::Postgres;
        if needs_postgres && self.database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        for (name, value) in [
            ("DB_MAX_CONNECTIONS", self.db_max_connections as usize),
            ("CACHE_BREAKER_FAILURES", self.cache_breaker_failures as usize),
            ("AUDIT_BATCHERS", self.audit_batchers),
            ("AUDIT_PERSISTERS", self.audit_persisters),
            ("AUDIT_QUEUE_CAPACITY", self.audit_queue_capacity),
        ] {
            if value == 0 {
                return Err(invalid(name, "0", "a positive integer"));
            }
        }

        Ok(())
    }

    pub fn cache_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.cache_breaker_failures,
            timeout: self.cache_breaker_cooldown,
            ..CircuitBreakerConfig::default()
        }
    }

    pub fn audit_pipeline(&self) -> AuditPipelineConfig {
        AuditPipelineConfig {
            batchers: self.audit_batchers,
            persisters: self.audit_persisters,
            queue_capacity: self.audit_queue_capacity,
            ..AuditPipelineConfig::default()
        }
    }
}

fn invalid(name: &'static str, value: &str, expected: &'static str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        expected,
    }
}

fn parse<T, V>(var: &V, name: &'static str, default: T, expected: &'static str) -> Result<T, ConfigError>
where
    T: FromStr,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| invalid(name, &raw, expected)),
    }
}
