/// Origin fetcher: builds signed delivery URLs and optionally verifies them
///
/// URL format:
/// `{base}/{cloud}/image/upload/{folder}/{code}.{format}?api_key=..&timestamp=..&signature=..`
///
/// The signature covers `public_id` and `timestamp`. In trust mode no request
/// is made; in verify mode the URL is probed with a HEAD request and the
/// status is classified. Transient failures are retried with backoff.
use async_trait::async_trait;
use resilience::{with_retry_if, RetryConfig, RetryError};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, UrlCache};
use crate::config::{CacheConfig, OriginConfig};
use crate::metrics;
use crate::services::signer::{SignatureGenerator, SignerError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OriginError {
    #[error("No flag available for country {0}")]
    NotFound(String),

    #[error("Origin unavailable: {0}")]
    Unavailable(String),

    #[error("Origin rejected signed request (status {0})")]
    Rejected(u16),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Origin fetch aborted: {0}")]
    Aborted(String),
}

impl OriginError {
    /// Failures worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, OriginError::Unavailable(_))
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            OriginError::NotFound(_) => "not_found",
            OriginError::Unavailable(_) => "unavailable",
            OriginError::Rejected(_) => "rejected",
            OriginError::Signing(_) => "signing_error",
            OriginError::Aborted(_) => "aborted",
        }
    }
}

impl From<JoinError> for OriginError {
    fn from(e: JoinError) -> Self {
        OriginError::Aborted(e.to_string())
    }
}

impl From<SignerError> for OriginError {
    fn from(e: SignerError) -> Self {
        OriginError::Signing(e.to_string())
    }
}

/// Reachability check against the origin; returns the HTTP status
#[async_trait]
pub trait OriginProbe: Send + Sync {
    async fn probe(&self, url: &str) -> Result<u16, OriginError>;
}

/// `HEAD` request over reqwest
pub struct HttpOriginProbe {
    client: reqwest::Client,
}

impl HttpOriginProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl OriginProbe for HttpOriginProbe {
    async fn probe(&self, url: &str) -> Result<u16, OriginError> {
        let response = self.client.head(url).send().await.map_err(|e| {
            if e.is_timeout() {
                OriginError::Unavailable("origin request timed out".to_string())
            } else {
                OriginError::Unavailable(e.to_string())
            }
        })?;
        Ok(response.status().as_u16())
    }
}

/// Map an origin status code to success or a typed failure
pub fn classify_status(key: &str, status: u16) -> Result<(), OriginError> {
    match status {
        200..=399 => Ok(()),
        404 | 410 => Err(OriginError::NotFound(key.to_string())),
        429 | 500..=599 => Err(OriginError::Unavailable(format!("origin returned {}", status))),
        other => Err(OriginError::Rejected(other)),
    }
}

pub struct OriginFetcher {
    signer: SignatureGenerator,
    config: OriginConfig,
    probe: Option<Arc<dyn OriginProbe>>,
    cache: Arc<UrlCache>,
    retry: RetryConfig,
    ttl: Duration,
    url_lifetime: Duration,
}

impl OriginFetcher {
    /// `probe` is only consulted when `config.verify` is set
    pub fn new(
        config: OriginConfig,
        cache_config: &CacheConfig,
        cache: Arc<UrlCache>,
        probe: Option<Arc<dyn OriginProbe>>,
    ) -> Result<Self, SignerError> {
        let signer = SignatureGenerator::new(config.api_secret.clone())?;
        let retry = RetryConfig {
            max_retries: config.max_retries,
            ..RetryConfig::default()
        };
        let probe = if config.verify { probe } else { None };

        Ok(Self {
            signer,
            probe,
            cache,
            retry,
            ttl: cache_config.ttl,
            // A URL may be served stale until the hard horizon, so it must stay valid that long
            url_lifetime: cache_config.ttl.saturating_add(cache_config.grace),
            config,
        })
    }

    pub fn public_id(&self, key: &str) -> String {
        if self.config.folder.is_empty() {
            key.to_ascii_lowercase()
        } else {
            format!("{}/{}", self.config.folder, key.to_ascii_lowercase())
        }
    }

    /// Build the signed URL for `key` as if the current time were `now_unix`
    pub fn signed_url(&self, key: &str, now_unix: u64) -> Result<String, OriginError> {
        let public_id = self.public_id(key);
        let timestamp = now_unix.saturating_add(self.url_lifetime.as_secs()).to_string();
        let signature = self
            .signer
            .sign([("public_id", public_id.as_str()), ("timestamp", timestamp.as_str())])?;

        Ok(format!(
            "{}/{}/image/upload/{}.{}?api_key={}&timestamp={}&signature={}",
            self.config.base_url,
            urlencoding::encode(&self.config.cloud_name),
            public_id,
            self.config.format,
            urlencoding::encode(&self.config.api_key),
            timestamp,
            signature
        ))
    }

    /// Resolve `key` to a signed URL and store it in the cache.
    ///
    /// Failures are returned as-is and never cached.
    pub async fn resolve(&self, key: &str) -> Result<String, OriginError> {
        let result = self.resolve_uncached(key).await;
        match &result {
            Ok(url) => {
                self.cache.put(CacheEntry::new(key, url.clone(), self.ttl));
                metrics::record_origin_fetch("ok");
                info!(key = %key, "Resolved signed URL");
            }
            Err(e) => {
                metrics::record_origin_fetch(e.metric_label());
                warn!(key = %key, error = %e, "Origin resolution failed");
            }
        }
        result
    }

    async fn resolve_uncached(&self, key: &str) -> Result<String, OriginError> {
        let url = self.signed_url(key, unix_now()?)?;

        let Some(probe) = &self.probe else {
            return Ok(url);
        };

        let target = url.as_str();
        with_retry_if(
            self.retry.clone(),
            || async move {
                let status = probe.probe(target).await?;
                debug!(key = %key, status, "Origin probe completed");
                classify_status(key, status)
            },
            OriginError::is_transient,
        )
        .await
        .map_err(RetryError::into_inner)?;

        Ok(url)
    }
}

fn unix_now() -> Result<u64, OriginError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| OriginError::Signing(format!("Time error: {}", e)))
}
