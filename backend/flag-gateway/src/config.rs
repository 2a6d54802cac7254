//! Configuration for flag-gateway
//!
//! Loads settings from:
//! 1. Environment variables
//! 2. .env file (local development)
//!
//! Everything is validated once at startup; the resulting `Config` is immutable.

use std::env;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use crate::middleware::rate_limit::{ClientKeyStrategy, RateLimitConfig};

/// Longest accepted TTL, grace period, window or timeout
const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;
const MAX_DURATION_MS: u64 = MAX_DURATION_SECS * 1000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Origin credentials and verification policy
    pub origin: OriginConfig,

    /// Resolved-URL cache
    pub cache: CacheConfig,

    /// Per-client request limits
    pub rate_limit: RateLimitConfig,

    /// Upper bound a client waits for a resolution
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone)]
pub struct OriginConfig {
    pub base_url: String,
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    /// Folder the flag assets live in, without surrounding slashes
    pub folder: String,
    /// Delivered file extension
    pub format: String,
    /// HEAD the signed URL before handing it out
    pub verify: bool,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl fmt::Debug for OriginConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OriginConfig")
            .field("base_url", &self.base_url)
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("folder", &self.folder)
            .field("format", &self.format)
            .field("verify", &self.verify)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl OriginConfig {
    /// Credentials with default delivery settings (trust mode)
    pub fn new(
        cloud_name: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: "https://res.cloudinary.com".to_string(),
            cloud_name: cloud_name.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            folder: "flags".to_string(),
            format: "png".to_string(),
            verify: false,
            timeout: Duration::from_millis(3000),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    /// How long past `ttl` a stale entry may still be served
    pub grace: Duration,
    pub capacity: NonZeroUsize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            grace: Duration::from_secs(300),
            capacity: NonZeroUsize::new(1000).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl Config {
    /// Default settings around the given origin credentials
    pub fn with_origin(origin: OriginConfig) -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            origin,
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            request_timeout: Duration::from_millis(10_000),
        }
    }

    /// Load configuration from the process environment (and `.env` if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };

        let mut origin = OriginConfig::new(
            vars.required("CLOUDINARY_CLOUD_NAME")?,
            vars.required("CLOUDINARY_API_KEY")?,
            vars.required("CLOUDINARY_API_SECRET")?,
        );
        if let Some(base_url) = vars.get("ORIGIN_BASE_URL") {
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    name: "ORIGIN_BASE_URL",
                    reason: "must start with http:// or https://".to_string(),
                });
            }
            origin.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(folder) = vars.get("FLAG_FOLDER") {
            origin.folder = folder.trim_matches('/').to_string();
        }
        if let Some(format) = vars.get("FLAG_FORMAT") {
            origin.format = format.trim_start_matches('.').to_ascii_lowercase();
        }
        origin.verify = vars.parse_bool("ORIGIN_VERIFY", origin.verify)?;
        origin.timeout =
            Duration::from_millis(vars.bounded("ORIGIN_TIMEOUT_MS", 3000, MAX_DURATION_MS)?);
        origin.max_retries = vars.parse("ORIGIN_MAX_RETRIES", origin.max_retries)?;

        let capacity = vars.positive("CACHE_CAPACITY", 1000)?;
        let cache = CacheConfig {
            ttl: Duration::from_secs(vars.bounded("CACHE_TTL_SECONDS", 3600, MAX_DURATION_SECS)?),
            grace: Duration::from_secs(at_most(
                "CACHE_GRACE_SECONDS",
                vars.parse("CACHE_GRACE_SECONDS", 300)?,
                MAX_DURATION_SECS,
            )?),
            capacity: NonZeroUsize::new(capacity as usize).ok_or(ConfigError::Invalid {
                name: "CACHE_CAPACITY",
                reason: "must be greater than zero".to_string(),
            })?,
        };

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            max_requests: vars.bounded(
                "RATE_LIMIT_MAX",
                u64::from(defaults.max_requests),
                u64::from(u32::MAX),
            )? as u32,
            window_seconds: vars.bounded(
                "RATE_LIMIT_WINDOW_SECONDS",
                defaults.window_seconds,
                MAX_DURATION_SECS,
            )?,
            key_strategy: vars.parse::<ClientKeyStrategy>(
                "RATE_LIMIT_KEY_STRATEGY",
                defaults.key_strategy,
            )?,
            trust_forwarded_for: vars
                .parse_bool("TRUST_FORWARDED_FOR", defaults.trust_forwarded_for)?,
        };

        Ok(Self {
            server: ServerConfig {
                host: vars.get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: vars.parse("SERVER_PORT", 8080)?,
            },
            origin,
            cache,
            rate_limit,
            request_timeout: Duration::from_millis(vars.bounded(
                "REQUEST_TIMEOUT_MS",
                10_000,
                MAX_DURATION_MS,
            )?),
        })
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty trimmed value, if set
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(name) {
            Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn positive(&self, name: &'static str, default: u64) -> Result<u64, ConfigError> {
        let value = self.parse::<u64>(name, default)?;
        if value == 0 {
            return Err(ConfigError::Invalid {
                name,
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    /// Positive and no larger than `max`
    fn bounded(&self, name: &'static str, default: u64, max: u64) -> Result<u64, ConfigError> {
        at_most(name, self.positive(name, default)?, max)
    }

    fn parse_bool(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    name,
                    reason: format!("expected a boolean, got '{}'", v),
                }),
            },
        }
    }
}

fn at_most(name: &'static str, value: u64, max: u64) -> Result<u64, ConfigError> {
    if value > max {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("must be at most {}", max),
        });
    }
    Ok(value)
}
