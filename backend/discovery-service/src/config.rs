/// Configuration management for discovery-service
///
/// Loads configuration from environment variables (after `.env`, if present).
use anyhow::{Context, Result};
use resilience::presets;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Kafka configuration; `None` runs the in-process bus
    pub kafka: Option<KafkaConfig>,
    /// Radius query settings
    pub proximity: ProximityConfig,
    /// Outbox drain settings
    pub outbox: OutboxConfig,
    /// Lifecycle consumer settings
    pub consumer: ConsumerConfig,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (dev, staging, prod)
    pub env: String,
    /// Server host to bind to
    pub host: String,
    /// HTTP port
    pub http_port: u16,
    /// Name stamped on emitted events as their source
    pub service_name: String,
    /// Emit JSON log lines instead of the human format
    pub log_json: bool,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Max connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Min connections in pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
    /// Topics are `{topic_prefix}.{aggregate}.events`
    pub topic_prefix: String,
    pub send_timeout: Duration,
    /// Pause before a rejected message is fetched again
    pub redelivery_backoff: Duration,
}

/// Where radius queries are answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// In-process grid, warmed from the database and kept current by lifecycle events
    Grid,
    /// Bounding-box query against the posts table
    Postgres,
}

impl std::str::FromStr for IndexBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grid" | "memory" => Ok(IndexBackend::Grid),
            "postgres" | "pg" => Ok(IndexBackend::Postgres),
            other => Err(anyhow::anyhow!("unknown index backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProximityConfig {
    /// Radius used when the request omits one, meters
    pub default_radius_m: f64,
    /// Grid cell edge in degrees
    pub cell_size_deg: f64,
    pub query_timeout: Duration,
    pub index_backend: IndexBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    pub batch_size: i32,
    pub poll_interval: Duration,
    pub max_retries: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub handler_timeout: Duration,
    pub seen_set_ttl: Duration,
    pub seen_set_capacity: usize,
    /// How long processed-event markers are kept
    pub processed_retention: Duration,
    pub cleanup_interval: Duration,
}

// Default values
fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_or(key, default_ms))
}

fn env_budget(key: &str, default: Duration) -> Duration {
    env_millis(key, default.as_millis() as u64)
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_or(key, default_secs))
}

impl KafkaConfig {
    /// `None` when KAFKA_BROKERS is unset or blank
    pub fn from_env() -> Option<Self> {
        let brokers = std::env::var("KAFKA_BROKERS").ok()?;
        if brokers.trim().is_empty() {
            return None;
        }

        Some(Self {
            brokers,
            group_id: std::env::var("KAFKA_GROUP_ID")
                .unwrap_or_else(|_| "serendip-discovery".to_string()),
            topic_prefix: topic_prefix_from_env(),
            send_timeout: env_millis("KAFKA_SEND_TIMEOUT_MS", 5_000),
            redelivery_backoff: env_millis("KAFKA_REDELIVERY_BACKOFF_MS", 1_000),
        })
    }
}

/// Shared by the Kafka and in-process buses
pub fn topic_prefix_from_env() -> String {
    std::env::var("KAFKA_TOPIC_PREFIX").unwrap_or_else(|_| "serendip".to_string())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env_or("PORT", 8080),
            service_name: std::env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "discovery-service".to_string()),
            log_json: env_flag("LOG_JSON", false),
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable not set")?,
            max_connections: env_or("DB_MAX_CONNECTIONS", default_max_connections()),
            min_connections: env_or("DB_MIN_CONNECTIONS", default_min_connections()),
        };

        let index_backend = match std::env::var("PROXIMITY_INDEX") {
            Ok(value) => value.parse().context("Invalid PROXIMITY_INDEX")?,
            Err(_) => IndexBackend::Grid,
        };

        let proximity = ProximityConfig {
            default_radius_m: env_or("PROXIMITY_DEFAULT_RADIUS_M", 100.0),
            cell_size_deg: env_or("PROXIMITY_CELL_SIZE_DEG", 0.01),
            query_timeout: env_budget("PROXIMITY_QUERY_TIMEOUT_MS", presets::PROXIMITY_QUERY_TIMEOUT),
            index_backend,
        };
        if !(proximity.cell_size_deg > 0.0 && proximity.cell_size_deg <= 1.0) {
            anyhow::bail!(
                "PROXIMITY_CELL_SIZE_DEG must be within (0, 1], got {}",
                proximity.cell_size_deg
            );
        }

        let outbox = OutboxConfig {
            batch_size: env_or("OUTBOX_BATCH_SIZE", 100),
            poll_interval: env_millis("OUTBOX_POLL_INTERVAL_MS", 5_000),
            max_retries: env_or("OUTBOX_MAX_RETRIES", 5),
        };

        let consumer = ConsumerConfig {
            handler_timeout: env_budget(
                "CONSUMER_HANDLER_TIMEOUT_MS",
                presets::LIFECYCLE_HANDLER_TIMEOUT,
            ),
            seen_set_ttl: env_secs("CONSUMER_SEEN_TTL_SECS", 300),
            seen_set_capacity: env_or("CONSUMER_SEEN_CAPACITY", 10_000),
            processed_retention: env_secs("PROCESSED_EVENTS_RETENTION_SECS", 7 * 24 * 3600),
            cleanup_interval: env_secs("PROCESSED_EVENTS_CLEANUP_INTERVAL_SECS", 3600),
        };

        let config = Config {
            app,
            database,
            kafka: KafkaConfig::from_env(),
            proximity,
            outbox,
            consumer,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the workers cannot run with
    fn validate(&self) -> Result<()> {
        let intervals = [
            ("OUTBOX_POLL_INTERVAL_MS", self.outbox.poll_interval),
            (
                "PROCESSED_EVENTS_CLEANUP_INTERVAL_SECS",
                self.consumer.cleanup_interval,
            ),
            ("PROXIMITY_QUERY_TIMEOUT_MS", self.proximity.query_timeout),
            ("CONSUMER_HANDLER_TIMEOUT_MS", self.consumer.handler_timeout),
        ];
        for (key, value) in intervals {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than zero", key);
            }
        }
        if self.outbox.batch_size <= 0 || self.outbox.max_retries <= 0 {
            anyhow::bail!(
                "OUTBOX_BATCH_SIZE and OUTBOX_MAX_RETRIES must be positive, got {} and {}",
                self.outbox.batch_size,
                self.outbox.max_retries
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const TOUCHED: &[&str] = &[
        "DATABASE_URL",
        "KAFKA_BROKERS",
        "KAFKA_TOPIC_PREFIX",
        "PROXIMITY_INDEX",
        "PROXIMITY_DEFAULT_RADIUS_M",
        "PROXIMITY_CELL_SIZE_DEG",
        "OUTBOX_MAX_RETRIES",
        "OUTBOX_POLL_INTERVAL_MS",
        "PROCESSED_EVENTS_CLEANUP_INTERVAL_SECS",
    ];

    fn clear_env() {
        for key in TOUCHED {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_default_values() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://test");

        let config = Config::from_env().unwrap();

        assert_eq!(config.app.env, "development");
        assert_eq!(config.app.host, "0.0.0.0");
        assert_eq!(config.app.http_port, 8080);
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.database.min_connections, 5);
        assert!(config.kafka.is_none());
        assert_eq!(config.proximity.default_radius_m, 100.0);
        assert_eq!(config.proximity.cell_size_deg, 0.01);
        assert_eq!(config.proximity.index_backend, IndexBackend::Grid);
        assert_eq!(config.outbox.max_retries, 5);
        assert_eq!(config.consumer.processed_retention, Duration::from_secs(604_800));
        assert_eq!(config.proximity.query_timeout, presets::PROXIMITY_QUERY_TIMEOUT);
        assert_eq!(config.consumer.handler_timeout, presets::LIFECYCLE_HANDLER_TIMEOUT);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://test");
        std::env::set_var("KAFKA_BROKERS", "localhost:9092");
        std::env::set_var("KAFKA_TOPIC_PREFIX", "staging");
        std::env::set_var("PROXIMITY_INDEX", "postgres");
        std::env::set_var("OUTBOX_MAX_RETRIES", "8");

        let config = Config::from_env().unwrap();
        let kafka = config.kafka.expect("kafka configured");
        assert_eq!(kafka.brokers, "localhost:9092");
        assert_eq!(kafka.topic_prefix, "staging");
        assert_eq!(config.proximity.index_backend, IndexBackend::Postgres);
        assert_eq!(config.outbox.max_retries, 8);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_database_url_and_bad_values() {
        clear_env();
        assert!(Config::from_env().is_err());

        std::env::set_var("DATABASE_URL", "postgres://test");
        std::env::set_var("PROXIMITY_INDEX", "quadtree");
        assert!(Config::from_env().is_err());

        std::env::set_var("PROXIMITY_INDEX", "grid");
        std::env::set_var("PROXIMITY_CELL_SIZE_DEG", "0");
        assert!(Config::from_env().is_err());

        std::env::set_var("KAFKA_BROKERS", "   ");
        std::env::set_var("PROXIMITY_CELL_SIZE_DEG", "0.05");
        assert!(Config::from_env().unwrap().kafka.is_none());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_zero_intervals_are_rejected() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://test");

        std::env::set_var("PROCESSED_EVENTS_CLEANUP_INTERVAL_SECS", "0");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("PROCESSED_EVENTS_CLEANUP_INTERVAL_SECS"));

        std::env::set_var("PROCESSED_EVENTS_CLEANUP_INTERVAL_SECS", "60");
        std::env::set_var("OUTBOX_POLL_INTERVAL_MS", "0");
        assert!(Config::from_env().is_err());

        std::env::set_var("OUTBOX_POLL_INTERVAL_MS", "500");
        std::env::set_var("OUTBOX_MAX_RETRIES", "0");
        assert!(Config::from_env().is_err());

        std::env::set_var("OUTBOX_MAX_RETRIES", "3");
        assert!(Config::from_env().is_ok());
        clear_env();
    }
}
