use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;

use crate::collector::batch::BatchPolicy;
use crate::error::ConfigError;

/// Upper bound for PRICEMONITOR_FLUSH_CAPACITY.
pub const MAX_FLUSH_CAPACITY: usize = 1_000_000;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Loaded once at startup from the environment. A `.env` file in the
// working directory is honoured, real environment variables win.
//
// Every variable is optional. Values that are present but malformed
// abort startup with a `ConfigError`.
//
#[derive(Debug, Clone)]
pub struct Config {
    /// Raw comma-separated `brand:id` list (PRICEMONITOR_STATIONS)
    pub stations: String,

    /// Worker pool size per tick
    pub workers: usize,

    /// Time between dispatch ticks
    pub interval: Duration,

    /// Upper bound for a single station scrape
    pub scrape_timeout: Duration,

    /// Collector flush thresholds
    pub flush: FlushConfig,

    /// In-flight samples between workers and collector
    pub funnel_capacity: usize,

    /// Upper bound for a single storage call
    pub storage_timeout: Duration,

    /// Period of the metrics log line, `None` disables it
    pub metrics_interval: Option<Duration>,

    /// Demo mode flag (no database, rows are only logged)
    pub demo: bool,

    pub database: DatabaseConfig,
}

// ------------------------------------------------------------
// Flush configuration
// ------------------------------------------------------------
#[derive(Debug, Clone, Copy)]
pub struct FlushConfig {
    /// Buffer capacity in rows
    pub capacity: usize,

    /// Capacity trigger in percent, 1..=100
    pub threshold_percent: usize,

    /// Maximum age of a collection cycle
    pub deadline: Duration,
}

// ------------------------------------------------------------
// Database configuration
// ------------------------------------------------------------
//
// Either a full URL, or the individual connection parameters.
//
// NOTE:
// - The password is security-sensitive; `Debug` does not print it.
//
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub pool_size: u32,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<set>"))
            .field("user", &self.user)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

impl DatabaseConfig {
    /// Connection options handed to sqlx.
    ///
    /// A full URL is parsed as given. Otherwise the parts are set
    /// individually, so a password needs no percent-encoding.
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        match &self.url {
            Some(url) => url.parse::<PgConnectOptions>().map_err(|err| ConfigError::InvalidValue {
                key: "PRICEMONITOR_DATABASE_URL",
                value: "<redacted>".to_string(),
                reason: err.to_string(),
            }),
            None => Ok(PgConnectOptions::new()
                .host(&self.host)
                .port(self.port)
                .username(&self.user)
                .password(&self.password)
                .database(&self.name)),
        }
    }
}

impl Config {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => log::debug!("loaded {}", path.display()),
            Err(err) if err.not_found() => {}
            Err(err) => log::warn!("ignoring unreadable .env file: {err}"),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let workers = env.parse("PRICEMONITOR_WORKERS", 5usize)?;
        at_least("PRICEMONITOR_WORKERS", workers, 1)?;

        let interval_secs = env.parse("PRICEMONITOR_INTERVAL_SECS", 60u64)?;
        at_least("PRICEMONITOR_INTERVAL_SECS", interval_secs, 1)?;

        let scrape_timeout_secs = env.parse("PRICEMONITOR_SCRAPE_TIMEOUT_SECS", 30u64)?;
        at_least("PRICEMONITOR_SCRAPE_TIMEOUT_SECS", scrape_timeout_secs, 1)?;

        let capacity = env.parse("PRICEMONITOR_FLUSH_CAPACITY", 500usize)?;
        at_least("PRICEMONITOR_FLUSH_CAPACITY", capacity, 1)?;
        if capacity > MAX_FLUSH_CAPACITY {
            return Err(invalid(
                "PRICEMONITOR_FLUSH_CAPACITY",
                capacity,
                &format!("must be at most {MAX_FLUSH_CAPACITY}"),
            ));
        }

        let threshold_percent = env.parse("PRICEMONITOR_FLUSH_THRESHOLD_PERCENT", 80usize)?;
        if !(1..=100).contains(&threshold_percent) {
            return Err(invalid(
                "PRICEMONITOR_FLUSH_THRESHOLD_PERCENT",
                threshold_percent,
                "must be between 1 and 100",
            ));
        }

        let deadline_secs = env.parse("PRICEMONITOR_FLUSH_DEADLINE_SECS", 120u64)?;
        at_least("PRICEMONITOR_FLUSH_DEADLINE_SECS", deadline_secs, 1)?;

        let funnel_capacity = env.parse("PRICEMONITOR_FUNNEL_CAPACITY", 1usize)?;
        at_least("PRICEMONITOR_FUNNEL_CAPACITY", funnel_capacity, 1)?;

        let storage_timeout_secs = env.parse("PRICEMONITOR_STORAGE_TIMEOUT_SECS", 30u64)?;
        at_least("PRICEMONITOR_STORAGE_TIMEOUT_SECS", storage_timeout_secs, 1)?;

        let metrics_secs = env.parse("PRICEMONITOR_METRICS_INTERVAL_SECS", 60u64)?;

        let pool_size = env.parse("PRICEMONITOR_DATABASE_POOL_SIZE", 5u32)?;
        at_least("PRICEMONITOR_DATABASE_POOL_SIZE", pool_size, 1)?;

        let database = DatabaseConfig {
            url: env.get("PRICEMONITOR_DATABASE_URL"),
            user: env.string("PRICEMONITOR_DATABASE_USER", "postgres"),
            password: env.string("PRICEMONITOR_DATABASE_PASSWORD", "password"),
            host: env.string("PRICEMONITOR_DATABASE_HOST", "localhost"),
            port: env.parse("PRICEMONITOR_DATABASE_PORT", 5432u16)?,
            name: env.string("PRICEMONITOR_DATABASE_NAME", "pricemonitor"),
            pool_size,
        };
        // Reject a malformed URL now rather than on connect.
        database.connect_options()?;

        Ok(Self {
            stations: env.string("PRICEMONITOR_STATIONS", ""),
            workers,
            interval: Duration::from_secs(interval_secs),
            scrape_timeout: Duration::from_secs(scrape_timeout_secs),
            flush: FlushConfig {
                capacity,
                threshold_percent,
                deadline: Duration::from_secs(deadline_secs),
            },
            funnel_capacity,
            storage_timeout: Duration::from_secs(storage_timeout_secs),
            metrics_interval: (metrics_secs > 0).then(|| Duration::from_secs(metrics_secs)),
            demo: env.flag("PRICEMONITOR_DEMO")?,
            database,
        })
    }

    /// Flush policy for a run over `expected_samples` stations.
    pub fn batch_policy(&self, expected_samples: usize) -> BatchPolicy {
        BatchPolicy {
            capacity: self.flush.capacity,
            threshold_percent: self.flush.threshold_percent,
            deadline: self.flush.deadline,
            expected_samples,
        }
    }
}

// ------------------------------------------------------------
// Lookup helpers
// ------------------------------------------------------------
//
// Blank values count as unset, so `PRICEMONITOR_WORKERS=` in a
// `.env` file falls back to the default.
//
struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|err: T::Err| ConfigError::InvalidValue {
                key,
                value: raw.clone(),
                reason: err.to_string(),
            }),
        }
    }

    fn flag(&self, key: &'static str) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            None | Some("0" | "false" | "no" | "off") => Ok(false),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some(other) => Err(invalid(key, other, "expected true/false")),
        }
    }
}

fn at_least<T>(key: &'static str, value: T, min: T) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min {
        return Err(invalid(key, value, &format!("must be at least {min}")));
    }
    Ok(())
}

fn invalid(key: &'static str, value: impl std::fmt::Display, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
