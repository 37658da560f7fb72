use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

pub const VEP_BASE: &str = "https://rest.ensembl.org";
pub const VEP_SPECIES: &str = "human";
pub const RATE_LIMIT_REQUESTS: u32 = 15; // requests per window, Ensembl's documented ceiling
pub const RATE_LIMIT_WINDOW_SECS: u64 = 1;
pub const LOW_QUOTA_RATIO: f64 = 0.10;
pub const CACHE_CAPACITY: usize = 1000;
pub const GET_TIMEOUT_SECS: u64 = 10;
pub const POST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
pub const MAX_RETRY_AFTER_SECS: u64 = 3600;
pub const MAX_RATE_LIMIT_RETRIES: u32 = 1;
pub const BIND_ADDR: &str = "127.0.0.1:3030";
pub const REQUEST_TIMEOUT_SECS: u64 = 120; // inbound deadline, covers one Retry-After wait

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings for the annotation engine.
///
/// `Default` uses the constants above; [`AnnotatorConfig::from_env`] layers
/// environment overrides on top.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnnotatorConfig {
    pub base_url: String,
    pub species: String,
    pub rate_limit: u32,
    pub rate_window: Duration,
    pub cache_capacity: usize,
    /// `None` keeps entries for the life of the process.
    pub cache_ttl: Option<Duration>,
    pub get_timeout: Duration,
    pub post_timeout: Duration,
    pub default_retry_after: Duration,
    pub max_retries: u32,
    pub bind_addr: String,
    pub request_timeout: Duration,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            base_url: VEP_BASE.to_string(),
            species: VEP_SPECIES.to_string(),
            rate_limit: RATE_LIMIT_REQUESTS,
            rate_window: Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
            cache_capacity: CACHE_CAPACITY,
            cache_ttl: None,
            get_timeout: Duration::from_secs(GET_TIMEOUT_SECS),
            post_timeout: Duration::from_secs(POST_TIMEOUT_SECS),
            default_retry_after: Duration::from_secs(DEFAULT_RETRY_AFTER_SECS),
            max_retries: MAX_RATE_LIMIT_RETRIES,
            bind_addr: BIND_ADDR.to_string(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}

impl AnnotatorConfig {
    /// Defaults overridden by `VEP_BASE_URL`, `VEP_RATE_LIMIT`, `VEP_CACHE_CAPACITY`,
    /// `VEP_CACHE_TTL_SECS`, `VEP_MAX_RETRIES` and `ANNOTATOR_BIND`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("VEP_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(raw) = lookup("VEP_RATE_LIMIT") {
            let limit: u32 = parse_value("VEP_RATE_LIMIT", &raw)?;
            if limit == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "VEP_RATE_LIMIT",
                    value: raw,
                    reason: "must be at least 1".to_string(),
                });
            }
            config.rate_limit = limit;
        }
        if let Some(raw) = lookup("VEP_CACHE_CAPACITY") {
            config.cache_capacity = parse_value("VEP_CACHE_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("VEP_CACHE_TTL_SECS") {
            let secs: u64 = parse_value("VEP_CACHE_TTL_SECS", &raw)?;
            config.cache_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(raw) = lookup("VEP_MAX_RETRIES") {
            config.max_retries = parse_value("VEP_MAX_RETRIES", &raw)?;
        }
        if let Some(addr) = lookup("ANNOTATOR_BIND") {
            config.bind_addr = addr;
        }

        Ok(config)
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
