//! Configuration module for the application.
//!
//! Configuration is loaded from environment variables via figment. Duration
//! fields accept both numeric values (interpreted as seconds) and duration
//! strings with units (e.g. "30s", "2m").

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Main application configuration.
#[derive(Deserialize, Clone)]
pub struct Config {
    /// Log level for this crate's target specifically.
    ///
    /// e.g. "debug" behaves like "warn,bannerwatch=debug".
    /// Valid values: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Port for the web server (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database connection URL
    pub database_url: String,
    /// Graceful shutdown timeout duration (default: 8 seconds)
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    /// Base URL of the Banner self-service instance.
    #[serde(default = "default_banner_base_url")]
    pub banner_base_url: String,

    /// Number of concurrent scrape workers (default: 4).
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// How often the scheduler seeds subject jobs (default: 3 minutes).
    #[serde(
        default = "default_seed_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub seed_interval: Duration,
    /// First retry delay; doubles on each subsequent retry (default: 30s).
    #[serde(
        default = "default_retry_backoff_base",
        deserialize_with = "deserialize_duration"
    )]
    pub retry_backoff_base: Duration,
    /// Upper bound on the retry delay (default: 30 minutes).
    #[serde(
        default = "default_retry_backoff_max",
        deserialize_with = "deserialize_duration"
    )]
    pub retry_backoff_max: Duration,
    /// Age at which a held job lock is considered abandoned (default: 10 minutes).
    #[serde(
        default = "default_stale_lock_threshold",
        deserialize_with = "deserialize_duration"
    )]
    pub stale_lock_threshold: Duration,

    /// Rate limiting configuration for Banner API requests
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_banner_base_url() -> String {
    "https://ssbprod.utsa.edu/StudentRegistrationSsb/ssb".to_string()
}

fn default_worker_count() -> usize {
    4
}

fn default_seed_interval() -> Duration {
    Duration::from_secs(3 * 60)
}

fn default_retry_backoff_base() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_backoff_max() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_stale_lock_threshold() -> Duration {
    Duration::from_secs(10 * 60)
}

/// Rate limiting configuration for Banner API requests
#[derive(Deserialize, Clone, Debug)]
pub struct RateLimitingConfig {
    /// Requests per minute for session operations (very conservative)
    #[serde(default = "default_session_rpm")]
    pub session_rpm: u32,
    /// Requests per minute for search operations (moderate)
    #[serde(default = "default_search_rpm")]
    pub search_rpm: u32,
    /// Requests per minute for metadata operations (moderate)
    #[serde(default = "default_metadata_rpm")]
    pub metadata_rpm: u32,
    /// Requests per minute for reset operations (low priority)
    #[serde(default = "default_reset_rpm")]
    pub reset_rpm: u32,
    /// Burst allowance (extra requests allowed in short bursts)
    #[serde(default = "default_burst_allowance")]
    pub burst_allowance: u32,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        RateLimitingConfig {
            session_rpm: default_session_rpm(),
            search_rpm: default_search_rpm(),
            metadata_rpm: default_metadata_rpm(),
            reset_rpm: default_reset_rpm(),
            burst_allowance: default_burst_allowance(),
        }
    }
}

/// Default session requests per minute (6 = 1 every 10 seconds)
fn default_session_rpm() -> u32 {
    6
}

/// Default search requests per minute (30 = 1 every 2 seconds)
fn default_search_rpm() -> u32 {
    30
}

/// Default metadata requests per minute (20 = 1 every 3 seconds)
fn default_metadata_rpm() -> u32 {
    20
}

/// Default reset requests per minute (10 = 1 every 6 seconds)
fn default_reset_rpm() -> u32 {
    10
}

/// Default burst allowance (3 extra requests)
fn default_burst_allowance() -> u32 {
    3
}

/// Duration parser handling seconds (default unit), milliseconds and minutes.
///
/// Multiple units sum together ("2m 10s" = 130 seconds); fractions, exponents
/// and infinity are rejected.
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[TimeUnit::Second, TimeUnit::MilliSecond, TimeUnit::Minute])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Custom deserializer for duration fields that accepts both numeric and
/// string values.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER
                .parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "Invalid duration format '{value}': {e}. Examples: '5' (5 seconds), '3500ms', '30s', '2m'",
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("Duration conversion error: {e}")))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("Duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
