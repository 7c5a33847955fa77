// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Relay configuration loaded from environment variables.
//!
//! Loaded once at startup and passed by value to the components that
//! need it. A `.env` file in the working directory is honoured.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- NIU account ---
    /// Account login name
    pub niu_account: String,
    /// Hex MD5 digest of the account password
    pub niu_password_md5: String,
    /// Vehicle serial numbers to relay; empty means "use the account roster"
    pub vehicles: Vec<String>,
    /// Telemetry API base URL
    pub niu_api_url: String,
    /// Token endpoint base URL
    pub niu_account_url: String,

    // --- Traccar ---
    /// Ingestion endpoint (OsmAnd protocol port)
    pub traccar_url: String,

    // --- Reporting policy ---
    /// How often each vehicle is polled
    pub report_interval: Duration,
    /// Speeds (km/h) above this count as moving
    pub still_speed_threshold: f64,
    /// Heartbeat interval for a vehicle that is not moving
    pub still_report_interval: Duration,
    /// Maximum number of reports held for retry
    pub retry_queue_capacity: usize,

    /// Where renewed credentials are persisted
    pub credential_store_path: String,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            niu_account: "test@example.com".to_string(),
            niu_password_md5: "5f4dcc3b5aa765d61d8327deb882cf99".to_string(),
            vehicles: vec![],
            niu_api_url: DEFAULT_NIU_API_URL.to_string(),
            niu_account_url: DEFAULT_NIU_ACCOUNT_URL.to_string(),
            traccar_url: DEFAULT_TRACCAR_URL.to_string(),
            report_interval: Duration::from_secs(2),
            still_speed_threshold: 0.0,
            still_report_interval: Duration::from_secs(120),
            retry_queue_capacity: 2000,
            credential_store_path: "credentials.json".to_string(),
        }
    }
}

const DEFAULT_NIU_API_URL: &str = "https://app-api.niu.com";
const DEFAULT_NIU_ACCOUNT_URL: &str = "https://account.niu.com";
const DEFAULT_TRACCAR_URL: &str = "http://localhost:5055";

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let defaults = Self::default();

        let report_interval_secs: u64 = parse_or("REPORT_INTERVAL_SECS", 2)?;
        if report_interval_secs == 0 {
            return Err(ConfigError::Invalid("REPORT_INTERVAL_SECS", "0".to_string()));
        }

        Ok(Self {
            niu_account: env::var("NIU_ACCOUNT")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("NIU_ACCOUNT"))?,
            niu_password_md5: env::var("NIU_PASSWORD_MD5")
                .map(|v| v.trim().to_ascii_lowercase())
                .map_err(|_| ConfigError::Missing("NIU_PASSWORD_MD5"))?,
            vehicles: env::var("NIU_VEHICLES")
                .map(|v| parse_vehicle_list(&v))
                .unwrap_or_default(),
            niu_api_url: env::var("NIU_API_URL").unwrap_or(defaults.niu_api_url),
            niu_account_url: env::var("NIU_ACCOUNT_URL").unwrap_or(defaults.niu_account_url),
            traccar_url: env::var("TRACCAR_URL").unwrap_or(defaults.traccar_url),
            report_interval: Duration::from_secs(report_interval_secs),
            still_speed_threshold: parse_or("STILL_SPEED_THRESHOLD", 0.0)?,
            still_report_interval: Duration::from_secs(parse_or("STILL_REPORT_INTERVAL_SECS", 120)?),
            retry_queue_capacity: parse_or("RETRY_QUEUE_CAPACITY", 2000)?,
            credential_store_path: env::var("CREDENTIAL_STORE_PATH")
                .unwrap_or(defaults.credential_store_path),
        })
    }
}

/// Split a comma-separated list of serial numbers.
pub fn parse_vehicle_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read and parse an optional variable; unparsable values are an error.
fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(key, raw)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
