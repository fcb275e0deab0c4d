//! Local dashboard settings.
//!
//! Layering, lowest to highest precedence:
//! 1. built-in defaults,
//! 2. an optional JSON settings file,
//! 3. `EVALBOARD_*` environment variables,
//! 4. command-line flags (applied by the binary).
//!
//! # Environment Variables
//!
//! - `EVALBOARD_BASE_URL`: bootstrap origin, e.g. `http://localhost:8000`
//! - `EVALBOARD_PAGE_SIZE`: history page size (5, 10 or 25)
//! - `EVALBOARD_RECONNECT_INTERVAL_MS`: delay between reconnect attempts
//! - `EVALBOARD_MAX_RECONNECT_ATTEMPTS`: retries between successful opens
//! - `EVALBOARD_REQUEST_TIMEOUT_MS`: HTTP request timeout

use std::path::Path;
use std::time::Duration;

use evalboard_error::{EvalError, Result};
use evalboard_types::BaseUrl;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connection::{DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_INTERVAL, ReconnectPolicy};
use crate::history::PAGE_SIZE_OPTIONS;

pub const ENV_BASE_URL: &str = "EVALBOARD_BASE_URL";
pub const ENV_PAGE_SIZE: &str = "EVALBOARD_PAGE_SIZE";
pub const ENV_RECONNECT_INTERVAL_MS: &str = "EVALBOARD_RECONNECT_INTERVAL_MS";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "EVALBOARD_MAX_RECONNECT_ATTEMPTS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "EVALBOARD_REQUEST_TIMEOUT_MS";

const DEFAULT_PAGE_SIZE: u32 = 5;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub base_url: BaseUrl,
    pub page_size: u32,
    #[serde(with = "millis")]
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    #[serde(with = "millis")]
    pub request_timeout: Duration,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            base_url: BaseUrl::default(),
            page_size: DEFAULT_PAGE_SIZE,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl DashboardConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read a JSON settings file. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|err| {
            EvalError::config(format!("settings file {}: {err}", path.display()))
        })?;
        config.validate()?;
        debug!(path = %path.display(), "settings file loaded");
        Ok(config)
    }

    /// Overlay `EVALBOARD_*` variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_BASE_URL) {
            self.base_url = BaseUrl::parse(&raw)?;
        }
        if let Some(raw) = lookup(ENV_PAGE_SIZE) {
            self.page_size = parse_number(ENV_PAGE_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RECONNECT_INTERVAL_MS) {
            self.reconnect_interval =
                Duration::from_millis(parse_number(ENV_RECONNECT_INTERVAL_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_MAX_RECONNECT_ATTEMPTS) {
            self.max_reconnect_attempts = parse_number(ENV_MAX_RECONNECT_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            self.request_timeout = Duration::from_millis(parse_number(ENV_REQUEST_TIMEOUT_MS, &raw)?);
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if !PAGE_SIZE_OPTIONS.contains(&self.page_size) {
            return Err(EvalError::config(format!(
                "page size {} is not one of {PAGE_SIZE_OPTIONS:?}",
                self.page_size
            )));
        }
        if self.reconnect_interval.is_zero() {
            return Err(EvalError::config("reconnect interval must be positive"));
        }
        if self.request_timeout.is_zero() {
            return Err(EvalError::config("request timeout must be positive"));
        }
        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            interval: self.reconnect_interval,
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

fn parse_number<N: std::str::FromStr>(key: &str, raw: &str) -> Result<N> {
    raw.trim()
        .parse()
        .map_err(|_| EvalError::config(format!("{key}={raw} is not a valid number")))
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        u64::deserialize(de).map(Duration::from_millis)
    }
}
