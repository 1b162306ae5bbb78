//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use fulfillment::JobSettings;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `"json"` for JSON logs, anything else for text
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs in memory
/// - `PAYMENT_RETURN_URL`: where the provider sends the customer back
/// - `PAYMENT_SWEEP_INTERVAL_SECS`, `PAYMENT_TIMEOUT_SECS`,
///   `ORDER_SWEEP_INTERVAL_SECS`, `ORDER_PAYMENT_TIMEOUT_SECS`,
///   `OUTBOX_INTERVAL_SECS`, `OUTBOX_RETRY_BUDGET`, `OUTBOX_BATCH_SIZE`:
///   background job settings
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub json_logs: bool,
    pub database_url: Option<String>,
    pub payment_return_url: String,
    pub jobs: JobSettings,
}

const DEFAULT_RETURN_URL: &str = "http://localhost:3000/payments/return";

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = JobSettings::default();
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("PORT").unwrap_or(3000),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            json_logs: std::env::var("LOG_FORMAT")
                .map(|f| f.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            payment_return_url: std::env::var("PAYMENT_RETURN_URL")
                .unwrap_or_else(|_| DEFAULT_RETURN_URL.to_string()),
            jobs: JobSettings {
                payment_sweep_interval: secs_var("PAYMENT_SWEEP_INTERVAL_SECS")
                    .unwrap_or(defaults.payment_sweep_interval),
                payment_timeout: secs_var("PAYMENT_TIMEOUT_SECS")
                    .unwrap_or(defaults.payment_timeout),
                order_sweep_interval: secs_var("ORDER_SWEEP_INTERVAL_SECS")
                    .unwrap_or(defaults.order_sweep_interval),
                order_payment_timeout: secs_var("ORDER_PAYMENT_TIMEOUT_SECS")
                    .unwrap_or(defaults.order_payment_timeout),
                outbox_interval: secs_var("OUTBOX_INTERVAL_SECS")
                    .unwrap_or(defaults.outbox_interval),
                outbox_retry_budget: parse_var("OUTBOX_RETRY_BUDGET")
                    .unwrap_or(defaults.outbox_retry_budget),
                outbox_batch_size: parse_var("OUTBOX_BATCH_SIZE")
                    .unwrap_or(defaults.outbox_batch_size),
            },
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            json_logs: false,
            database_url: None,
            payment_return_url: DEFAULT_RETURN_URL.to_string(),
            jobs: JobSettings::default(),
        }
    }
}

fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn secs_var(key: &str) -> Option<Duration> {
    parse_var::<u64>(key)
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
