//! Daemon configuration from `DISPATCH_*` environment variables

use anyhow::{anyhow, bail, Context, Result};
use dispatch_core::application::processor::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_STALE_CLAIM_MS, DEFAULT_TICK_INTERVAL,
};
use dispatch_core::application::RetryConfig;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "~/.dispatch/dispatch.db";
pub const DEFAULT_RPC_PORT: u16 = 9531;
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Production: JSON structured logging
    Json,
    /// Development: pretty formatting with colors
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => bail!("unknown log format '{}' (expected json or pretty)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: String,
    pub rpc_port: u16,
    pub api_url: String,
    pub api_token: Option<String>,
    pub api_timeout: Duration,
    pub tick_interval: Duration,
    pub batch_size: usize,
    pub stale_claim_ms: i64,
    pub retry: RetryConfig,
    pub log_format: LogFormat,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    ///
    /// Unset variables take their default; set-but-invalid ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_url = get("DISPATCH_API_URL")
            .ok_or_else(|| anyhow!("DISPATCH_API_URL is required (invoicing API base URL)"))?;

        let defaults = RetryConfig::default();
        let retry = RetryConfig {
            max_retries: parse_or(&get, "DISPATCH_MAX_RETRIES", defaults.max_retries)?,
            base_delay: Duration::from_millis(parse_or(
                &get,
                "DISPATCH_BASE_DELAY_MS",
                millis(defaults.base_delay),
            )?),
            max_delay: Duration::from_millis(parse_or(
                &get,
                "DISPATCH_MAX_DELAY_MS",
                millis(defaults.max_delay),
            )?),
            backoff_multiplier: parse_or(
                &get,
                "DISPATCH_BACKOFF_MULTIPLIER",
                defaults.backoff_multiplier,
            )?,
            ..defaults
        };
        retry
            .validate()
            .map_err(|e| anyhow!("invalid retry configuration: {}", e))?;

        let batch_size: usize = parse_or(&get, "DISPATCH_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            bail!("DISPATCH_BATCH_SIZE must be at least 1");
        }

        let tick_secs: u64 = parse_or(
            &get,
            "DISPATCH_TICK_INTERVAL_SECS",
            DEFAULT_TICK_INTERVAL.as_secs(),
        )?;
        if tick_secs == 0 {
            bail!("DISPATCH_TICK_INTERVAL_SECS must be at least 1");
        }

        let stale_claim_secs: i64 = parse_or(
            &get,
            "DISPATCH_STALE_CLAIM_SECS",
            DEFAULT_STALE_CLAIM_MS / 1000,
        )?;

        Ok(Self {
            db_path: shellexpand::tilde(&get("DISPATCH_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()))
                .into_owned(),
            rpc_port: parse_or(&get, "DISPATCH_RPC_PORT", DEFAULT_RPC_PORT)?,
            api_url,
            api_token: get("DISPATCH_API_TOKEN"),
            api_timeout: Duration::from_secs(parse_or(
                &get,
                "DISPATCH_API_TIMEOUT_SECS",
                DEFAULT_API_TIMEOUT_SECS,
            )?),
            tick_interval: Duration::from_secs(tick_secs),
            batch_size,
            stale_claim_ms: stale_claim_secs.saturating_mul(1000),
            retry,
            log_format: parse_or(&get, "DISPATCH_LOG_FORMAT", LogFormat::Pretty)?,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| anyhow!("{}", e))
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<DaemonConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DaemonConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("DISPATCH_API_URL", "https://api.example")]).unwrap();

        assert_eq!(cfg.rpc_port, 9531);
        assert_eq!(cfg.tick_interval, Duration::from_secs(60));
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.stale_claim_ms, 300_000);
        assert_eq!(cfg.api_timeout, Duration::from_secs(30));
        assert_eq!(cfg.retry, RetryConfig::default());
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert!(cfg.db_path.ends_with(".dispatch/dispatch.db"));
        assert!(!cfg.db_path.starts_with('~'));
    }

    #[test]
    fn test_api_url_is_required() {
        let err = config(&[]).unwrap_err();
        assert!(err.to_string().contains("DISPATCH_API_URL"));
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("DISPATCH_API_URL", "https://api.example"),
            ("DISPATCH_MAX_RETRIES", "3"),
            ("DISPATCH_BASE_DELAY_MS", "500"),
            ("DISPATCH_MAX_DELAY_MS", "10000"),
            ("DISPATCH_BACKOFF_MULTIPLIER", "3.0"),
            ("DISPATCH_BATCH_SIZE", "25"),
            ("DISPATCH_LOG_FORMAT", "JSON"),
            ("DISPATCH_API_TOKEN", "secret"),
        ])
        .unwrap();

        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(500));
        assert_eq!(cfg.retry.max_delay, Duration::from_millis(10_000));
        assert_eq!(cfg.retry.backoff_multiplier, 3.0);
        assert_eq!(cfg.batch_size, 25);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.api_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let err = config(&[
            ("DISPATCH_API_URL", "https://api.example"),
            ("DISPATCH_RPC_PORT", "not-a-port"),
        ])
        .unwrap_err();
        assert!(format!("{:#}", err).contains("DISPATCH_RPC_PORT"));

        assert!(config(&[
            ("DISPATCH_API_URL", "https://api.example"),
            ("DISPATCH_BACKOFF_MULTIPLIER", "0.5"),
        ])
        .is_err());

        assert!(config(&[
            ("DISPATCH_API_URL", "https://api.example"),
            ("DISPATCH_BATCH_SIZE", "0"),
        ])
        .is_err());
    }
}
