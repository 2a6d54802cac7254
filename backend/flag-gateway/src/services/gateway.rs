/// Request orchestration for `GET /api/getFlag`
///
/// Per request: validate → rate check → cache read → (resolve). A fresh hit
/// returns immediately; a stale hit returns immediately and schedules one
/// background refresh; a miss joins or starts the single in-flight
/// resolution for the key and waits at most `request_timeout` for it.
///
/// All shared state lives on the `FlagGateway` instance, so tests build
/// isolated gateways.
use futures::future::{BoxFuture, FutureExt};
use resilience::with_timeout;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{CacheLookup, UrlCache};
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::metrics;
use crate::middleware::rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter};
use crate::services::coalescer::Coalescer;
use crate::services::country::{normalize_country, CountryLookup};
use crate::services::origin::{OriginError, OriginFetcher, OriginProbe};
use crate::services::signer::SignerError;

/// Longest raw identifier accepted before lookup
const MAX_COUNTRY_INPUT: usize = 64;

/// Where a successful answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Stale,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Stale => "STALE",
            CacheStatus::Miss => "MISS",
        }
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Stale => "stale",
            CacheStatus::Miss => "miss",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedFlag {
    pub country: String,
    pub secure_url: String,
    pub cache_status: CacheStatus,
    pub rate_limit: RateLimitDecision,
}

pub struct FlagGateway {
    lookup: Arc<dyn CountryLookup>,
    limiter: Arc<RateLimiter>,
    cache: Arc<UrlCache>,
    inflight: Coalescer<String, OriginError>,
    fetcher: Arc<OriginFetcher>,
    request_timeout: Duration,
}

impl FlagGateway {
    /// Build a gateway with its own cache, limiter and in-flight table.
    ///
    /// Fails only when the signing secret is unusable.
    pub fn new(
        config: &Config,
        lookup: Arc<dyn CountryLookup>,
        probe: Option<Arc<dyn OriginProbe>>,
    ) -> std::result::Result<Self, SignerError> {
        let cache = Arc::new(UrlCache::new(config.cache.capacity, config.cache.grace));
        let fetcher = OriginFetcher::new(config.origin.clone(), &config.cache, cache.clone(), probe)?;

        info!(
            verify = config.origin.verify,
            ttl_secs = config.cache.ttl.as_secs(),
            grace_secs = config.cache.grace.as_secs(),
            rate_limit_max = config.rate_limit.max_requests,
            "Flag gateway initialized"
        );

        Ok(Self {
            lookup,
            limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            cache,
            inflight: Coalescer::new(),
            fetcher: Arc::new(fetcher),
            request_timeout: config.request_timeout,
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn rate_limit_config(&self) -> &RateLimitConfig {
        self.limiter.config()
    }

    pub fn cache(&self) -> &UrlCache {
        &self.cache
    }

    /// Whether a resolution for `country` is currently running
    pub fn is_resolving(&self, country: &str) -> bool {
        self.inflight.is_pending(country)
    }

    /// Turn raw input into a canonical key or a validation error
    pub async fn normalize(&self, raw: Option<&str>) -> Result<String> {
        let raw = raw
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                GatewayError::Validation("Missing required query parameter 'country'.".to_string())
            })?;

        if raw.len() > MAX_COUNTRY_INPUT {
            return Err(GatewayError::Validation("Invalid country.".to_string()));
        }

        normalize_country(raw, self.lookup.as_ref())
            .await
            .ok_or_else(|| GatewayError::Validation(format!("Invalid country: '{}'.", raw)))
    }

    /// Resolve a flag URL for one client request
    pub async fn get_flag(&self, raw: Option<&str>, client_key: &str) -> Result<ResolvedFlag> {
        let country = self.normalize(raw).await?;
        debug!(country = %country, state = "validated", "Request validated");

        let rate_limit = self.limiter.check(client_key);
        if let RateLimitDecision::Limited { limit, retry_after } = rate_limit {
            metrics::record_rate_limited();
            return Err(GatewayError::RateLimited { limit, retry_after });
        }
        debug!(country = %country, state = "rate_checked", "Request admitted");

        let (secure_url, cache_status) = match self.cache.get(&country) {
            CacheLookup::Fresh(entry) => {
                metrics::record_cache_lookup(CacheStatus::Hit.metric_label());
                (entry.url, CacheStatus::Hit)
            }
            CacheLookup::Stale(entry) => {
                metrics::record_cache_lookup(CacheStatus::Stale.metric_label());
                self.schedule_refresh(&country);
                (entry.url, CacheStatus::Stale)
            }
            CacheLookup::Miss => {
                // Counted before resolving so failed misses are included
                metrics::record_cache_lookup(CacheStatus::Miss.metric_label());
                (self.resolve(&country).await?, CacheStatus::Miss)
            }
        };

        debug!(country = %country, cache = %cache_status, state = "responded", "Flag resolved");

        Ok(ResolvedFlag {
            country,
            secure_url,
            cache_status,
            rate_limit,
        })
    }

    /// Join or start the resolution for `country` and wait for it, bounded by the request timeout.
    ///
    /// Timing out only abandons this caller's wait.
    async fn resolve(&self, country: &str) -> Result<String> {
        let (pending, _) = self
            .inflight
            .join_or_start(country, || self.resolve_job(country));

        match with_timeout(self.request_timeout, pending).await {
            Ok(result) => result.map_err(GatewayError::from),
            Err(_) => {
                warn!(country = %country, timeout_ms = self.request_timeout.as_millis() as u64, "Request timed out waiting for origin");
                Err(GatewayError::Timeout(self.request_timeout))
            }
        }
    }

    /// Start a detached refresh for `country` unless one is already running.
    ///
    /// Returns whether a refresh was started. The outcome is only logged.
    pub fn schedule_refresh(&self, country: &str) -> bool {
        if self.inflight.is_pending(country) {
            debug!(country = %country, "Refresh already in flight");
            return false;
        }

        let (pending, started) = self
            .inflight
            .join_or_start(country, || self.resolve_job(country));
        if !started {
            return false;
        }

        let country = country.to_owned();
        tokio::spawn(async move {
            match pending.await {
                Ok(_) => {
                    metrics::record_background_refresh("ok");
                    info!(country = %country, "Background refresh completed");
                }
                Err(e) => {
                    metrics::record_background_refresh(e.metric_label());
                    warn!(country = %country, error = %e, "Background refresh failed; serving stale entry");
                }
            }
        });
        true
    }

    fn resolve_job(&self, country: &str) -> BoxFuture<'static, std::result::Result<String, OriginError>> {
        let fetcher = Arc::clone(&self.fetcher);
        let country = country.to_owned();
        async move { fetcher.resolve(&country).await }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use crate::config::OriginConfig;
    use crate::services::country::StaticCountryLookup;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProbe {
        status: u16,
        delay: Duration,
        calls: AtomicU32,
    }

    impl CountingProbe {
        fn new(status: u16, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                status,
                delay,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OriginProbe for CountingProbe {
        async fn probe(&self, _url: &str) -> std::result::Result<u16, OriginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.status)
        }
    }

    fn config() -> Config {
        let mut origin = OriginConfig::new("demo", "123456", "test-secret-key");
        origin.verify = true;
        origin.max_retries = 0;
        let mut config = Config::with_origin(origin);
        config.cache.ttl = Duration::from_secs(10);
        config.cache.grace = Duration::from_secs(60);
        config
    }

    fn gateway(config: &Config, probe: &Arc<CountingProbe>) -> FlagGateway {
        FlagGateway::new(
            config,
            Arc::new(StaticCountryLookup::new()),
            Some(probe.clone() as Arc<dyn OriginProbe>),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_short_circuits_origin() {
        let probe = CountingProbe::new(200, Duration::from_millis(5));
        let gateway = gateway(&config(), &probe);

        let first = gateway.get_flag(Some("DE"), "client").await.unwrap();
        let second = gateway.get_flag(Some("de"), "client").await.unwrap();

        assert_eq!(first.cache_status, CacheStatus::Miss);
        assert_eq!(second.cache_status, CacheStatus::Hit);
        assert_eq!(first.secure_url, second.secure_url);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_make_one_origin_call() {
        let probe = CountingProbe::new(200, Duration::from_millis(50));
        let gateway = Arc::new(gateway(&config(), &probe));

        let mut requests = Vec::new();
        for i in 0..25 {
            let gateway = gateway.clone();
            requests.push(tokio::spawn(async move {
                gateway
                    .get_flag(Some("Japan"), &format!("client-{}", i))
                    .await
            }));
        }

        let mut urls = Vec::new();
        for request in requests {
            urls.push(request.await.unwrap().unwrap().secure_url);
        }
        assert_eq!(probe.calls(), 1);
        assert!(urls.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_read_triggers_exactly_one_refresh() {
        let probe = CountingProbe::new(200, Duration::from_millis(50));
        let gateway = gateway(&config(), &probe);

        gateway.get_flag(Some("FR"), "client").await.unwrap();
        assert_eq!(probe.calls(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;

        for _ in 0..5 {
            let stale = gateway.get_flag(Some("FR"), "client").await.unwrap();
            assert_eq!(stale.cache_status, CacheStatus::Stale);
        }
        assert!(gateway.is_resolving("FR"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!gateway.is_resolving("FR"));
        assert_eq!(probe.calls(), 2);

        let refreshed = gateway.get_flag(Some("FR"), "client").await.unwrap();
        assert_eq!(refreshed.cache_status, CacheStatus::Hit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_serving_stale() {
        let probe = CountingProbe::new(503, Duration::ZERO);
        let config = config();
        let gateway = gateway(&config, &probe);
        gateway
            .cache()
            .put(CacheEntry::new("IT", "https://cdn/it", Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(2)).await;
        let stale = gateway.get_flag(Some("IT"), "client").await.unwrap();
        assert_eq!(stale.secure_url, "https://cdn/it");

        tokio::time::sleep(Duration::from_millis(10)).await;
        let again = gateway.get_flag(Some("IT"), "client").await.unwrap();
        assert_eq!(again.cache_status, CacheStatus::Stale);
        assert_eq!(again.secure_url, "https://cdn/it");
    }

    #[tokio::test]
    async fn test_invalid_country_has_no_rate_limit_side_effect() {
        let probe = CountingProbe::new(200, Duration::ZERO);
        let gateway = gateway(&config(), &probe);

        for raw in [None, Some(""), Some("zz9"), Some("Atlantis")] {
            let result = gateway.get_flag(raw, "client").await;
            assert!(matches!(result, Err(GatewayError::Validation(_))));
        }
        assert_eq!(gateway.limiter().tracked_clients(), 0);
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_rejects_after_max() {
        let probe = CountingProbe::new(200, Duration::ZERO);
        let mut config = config();
        config.rate_limit.max_requests = 3;
        let gateway = gateway(&config, &probe);

        for _ in 0..3 {
            gateway.get_flag(Some("DE"), "client").await.unwrap();
        }
        let rejected = gateway.get_flag(Some("DE"), "client").await;
        assert!(matches!(rejected, Err(GatewayError::RateLimited { limit: 3, .. })));

        // Another client is unaffected
        assert!(gateway.get_flag(Some("DE"), "other").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_origin_not_found_is_not_cached() {
        let probe = CountingProbe::new(404, Duration::ZERO);
        let gateway = gateway(&config(), &probe);

        for _ in 0..2 {
            let result = gateway.get_flag(Some("AQ"), "client").await;
            assert!(matches!(
                result,
                Err(GatewayError::Origin(OriginError::NotFound(ref c))) if c == "AQ"
            ));
        }
        assert_eq!(probe.calls(), 2);
        assert!(gateway.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_miss_is_counted() {
        let probe = CountingProbe::new(503, Duration::ZERO);
        let gateway = gateway(&config(), &probe);

        let before = metrics::cache_lookup_count("miss");
        let result = gateway.get_flag(Some("NO"), "client").await;
        assert!(matches!(result, Err(GatewayError::Origin(OriginError::Unavailable(_)))));
        assert!(metrics::cache_lookup_count("miss") > before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_misses_make_one_origin_call() {
        let probe = CountingProbe::new(200, Duration::from_millis(100));
        let gateway = Arc::new(gateway(&config(), &probe));
        let start = Arc::new(tokio::sync::Barrier::new(32));

        let mut requests = Vec::new();
        for i in 0..32 {
            let gateway = gateway.clone();
            let start = start.clone();
            requests.push(tokio::spawn(async move {
                start.wait().await;
                gateway
                    .get_flag(Some("Canada"), &format!("client-{}", i))
                    .await
            }));
        }

        let mut urls = Vec::new();
        for request in requests {
            let flag = request.await.unwrap().unwrap();
            assert_eq!(flag.cache_status, CacheStatus::Miss);
            urls.push(flag.secure_url);
        }
        assert_eq!(probe.calls(), 1);
        assert!(urls.windows(2).all(|w| w[0] == w[1]));
        assert!(!gateway.is_resolving("CA"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_cancel_resolution() {
        let probe = CountingProbe::new(200, Duration::from_secs(20));
        let mut config = config();
        config.request_timeout = Duration::from_secs(1);
        let gateway = gateway(&config, &probe);

        let result = gateway.get_flag(Some("BR"), "client").await;
        assert!(matches!(result, Err(GatewayError::Timeout(_))));

        // Resolution finishes at t=20s and is cached from then on
        tokio::time::sleep(Duration::from_secs(20)).await;
        let cached = gateway.get_flag(Some("BR"), "client").await.unwrap();
        assert_eq!(cached.cache_status, CacheStatus::Hit);
        assert_eq!(probe.calls(), 1);
    }
}
