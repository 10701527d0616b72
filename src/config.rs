//! Environment configuration

use crate::realtime::TransportConfig;
use crate::runtime::RuntimeConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Widget settings, read from `CONSULT_*` environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetConfig {
    /// Backend base URL for both the REST surface and the event channel
    pub api_url: String,
    pub db_path: PathBuf,
    pub timezone: String,
    pub referrer: Option<String>,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub availability_refresh: Duration,
}

impl WidgetConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = lookup("CONSULT_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".consult-widget").join("identity.db")
            },
            PathBuf::from,
        );

        Self {
            api_url: lookup("CONSULT_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            db_path,
            timezone: lookup("CONSULT_TIMEZONE").unwrap_or_else(|| "UTC".to_string()),
            referrer: lookup("CONSULT_REFERRER").filter(|r| !r.is_empty()),
            user_agent: lookup("CONSULT_USER_AGENT")
                .unwrap_or_else(|| format!("consult-chat/{}", env!("CARGO_PKG_VERSION"))),
            request_timeout: Duration::from_secs(parse_or(&lookup, "CONSULT_REQUEST_TIMEOUT_SECS", 30)),
            reconnect_attempts: parse_or(&lookup, "CONSULT_RECONNECT_ATTEMPTS", 5),
            reconnect_delay: Duration::from_millis(parse_or(&lookup, "CONSULT_RECONNECT_DELAY_MS", 1000)),
            reconnect_max_delay: Duration::from_millis(parse_or(
                &lookup,
                "CONSULT_RECONNECT_MAX_DELAY_MS",
                5000,
            )),
            availability_refresh: Duration::from_secs(parse_or(
                &lookup,
                "CONSULT_AVAILABILITY_REFRESH_SECS",
                30,
            )),
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            max_attempts: self.reconnect_attempts,
            base_delay: self.reconnect_delay,
            max_delay: self.reconnect_max_delay.max(self.reconnect_delay),
            ..TransportConfig::default()
        }
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            timezone: self.timezone.clone(),
            referrer: self.referrer.clone(),
            user_agent: Some(self.user_agent.clone()),
            refresh_interval: self.availability_refresh,
            transport: self.transport(),
        }
    }
}

/// Parse a positive number, falling back to `default` with a warning
fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + PartialOrd + Default + Copy + std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => value,
        _ => {
            tracing::warn!(key, value = %raw, default = %default, "Invalid setting, using default");
            default
        }
    }
}
