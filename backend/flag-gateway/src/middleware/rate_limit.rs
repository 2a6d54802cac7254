//! Per-client fixed-window rate limiting
//!
//! **Configuration:**
//! - 100 requests per 15-minute window per client key (defaults)
//! - Client key strategy is chosen once for the whole process
//!
//! **Design:**
//! - One counter per client key in a sharded `DashMap`; check-and-increment
//!   happens under the shard lock so each admit is atomic
//! - A window that has reached `expires_at` is replaced, never decremented
//! - Uses the peer address; `X-Forwarded-For` only when explicitly trusted,
//!   which is safe only behind a proxy that overwrites the header

use actix_web::HttpRequest;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How a request is mapped to a rate-limit bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKeyStrategy {
    /// Client IP only
    Ip,
    /// Client IP plus a hash of the User-Agent, so clients behind one NAT are
    /// less likely to share a bucket
    IpUserAgent,
}

impl FromStr for ClientKeyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ip" => Ok(Self::Ip),
            "ip_user_agent" | "ip+user_agent" => Ok(Self::IpUserAgent),
            other => Err(format!("unknown client key strategy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
    pub key_strategy: ClientKeyStrategy,
    /// Take the client IP from `X-Forwarded-For`. Enable only behind a proxy
    /// that sets the header, or clients can pick their own bucket.
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_seconds: 900, // 15 minutes
            key_strategy: ClientKeyStrategy::Ip,
            trust_forwarded_for: false,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        limit: u32,
        remaining: u32,
        reset_after: Duration,
    },
    Limited {
        limit: u32,
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    expires_at: Instant,
}

impl Window {
    fn starting_at(now: Instant, length: Duration) -> Self {
        Self {
            count: 0,
            expires_at: now + length,
        }
    }
}

/// In-process fixed-window limiter
pub struct RateLimiter {
    config: RateLimitConfig,
    counters: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            counters: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit or reject one request for `client_key`
    pub fn admit(&self, client_key: &str) -> bool {
        self.check(client_key).is_allowed()
    }

    /// Admit or reject one request, reporting the remaining budget
    pub fn check(&self, client_key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let length = self.config.window();
        let limit = self.config.max_requests;

        let mut window = self
            .counters
            .entry(client_key.to_owned())
            .or_insert_with(|| Window::starting_at(now, length));

        if now >= window.expires_at {
            *window = Window::starting_at(now, length);
        }

        let reset_after = window.expires_at.saturating_duration_since(now);

        if window.count >= limit {
            warn!(client_key = %client_key, limit, "Rate limit exceeded");
            return RateLimitDecision::Limited {
                limit,
                retry_after: reset_after,
            };
        }

        window.count += 1;
        debug!(client_key = %client_key, count = window.count, "Rate limit check passed");

        RateLimitDecision::Allowed {
            limit,
            remaining: limit - window.count,
            reset_after,
        }
    }

    /// Drop counters whose window has elapsed. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, window| now < window.expires_at);
        before.saturating_sub(self.counters.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.counters.len()
    }
}

/// Periodically drop elapsed counters so memory tracks active clients only.
///
/// Runs once per window until the returned handle is aborted.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>) -> JoinHandle<()> {
    let period = limiter.config().window();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let removed = limiter.sweep_expired();
            if removed > 0 {
                info!(removed, remaining = limiter.tracked_clients(), "Swept expired rate-limit counters");
            }
        }
    })
}

/// Derive the rate-limit key for a request using the configured strategy
pub fn client_key(req: &HttpRequest, config: &RateLimitConfig) -> String {
    let ip = extract_client_ip(req, config.trust_forwarded_for);

    match config.key_strategy {
        ClientKeyStrategy::Ip => format!("rate_limit:ip:{}", ip),
        ClientKeyStrategy::IpUserAgent => {
            let user_agent = req
                .headers()
                .get("User-Agent")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            let digest = Sha256::digest(user_agent.as_bytes());
            format!("rate_limit:ip_ua:{}:{}", ip, &hex::encode(digest)[..16])
        }
    }
}

/// Extract client IP from request, optionally respecting X-Forwarded-For
fn extract_client_ip(req: &HttpRequest, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for {
        if let Some(x_forwarded_for) = req.headers().get("X-Forwarded-For") {
            if let Ok(header_value) = x_forwarded_for.to_str() {
                // X-Forwarded-For can contain multiple IPs; take the first one
                if let Some(first_ip) = header_value.split(',').next() {
                    if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
                        return ip;
                    }
                }
            }
        }
    }

    // Fall back to connection info
    req.peer_addr()
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn limiter(max_requests: u32, window_seconds: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window_seconds,
            ..Default::default()
        })
    }

    #[test]
    fn test_rate_limit_config_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_requests, 100);
        assert_eq!(config.window_seconds, 900);
        assert_eq!(config.key_strategy, ClientKeyStrategy::Ip);
        assert!(!config.trust_forwarded_for);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_admitted_then_rejected() {
        let limiter = limiter(100, 900);

        for i in 1..=100 {
            assert!(limiter.admit("client"), "request {} should be admitted", i);
        }
        assert!(!limiter.admit("client"));
        assert!(!limiter.admit("client"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reset_starts_fresh_count() {
        let limiter = limiter(2, 60);

        assert!(limiter.admit("client"));
        assert!(limiter.admit("client"));
        assert!(!limiter.admit("client"));

        // Exactly at the boundary belongs to the new window
        tokio::time::advance(Duration::from_secs(60)).await;
        match limiter.check("client") {
            RateLimitDecision::Allowed { remaining, .. } => assert_eq!(remaining, 1),
            other => panic!("expected admission, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_just_before_boundary_still_limited() {
        let limiter = limiter(1, 60);
        assert!(limiter.admit("client"));

        tokio::time::advance(Duration::from_millis(59_999)).await;
        match limiter.check("client") {
            RateLimitDecision::Limited { retry_after, .. } => {
                assert_eq!(retry_after, Duration::from_millis(1))
            }
            other => panic!("expected limit, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_are_independent() {
        let limiter = limiter(1, 60);
        assert!(limiter.admit("a"));
        assert!(!limiter.admit("a"));
        assert!(limiter.admit("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expired() {
        let limiter = limiter(5, 60);
        limiter.admit("a");
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.admit("b");
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(limiter.sweep_expired(), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_each_window() {
        let limiter = Arc::new(limiter(5, 60));
        limiter.admit("a");
        let sweeper = spawn_sweeper(limiter.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(limiter.tracked_clients(), 0);

        sweeper.abort();
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("ip".parse::<ClientKeyStrategy>().unwrap(), ClientKeyStrategy::Ip);
        assert_eq!(
            "IP_USER_AGENT".parse::<ClientKeyStrategy>().unwrap(),
            ClientKeyStrategy::IpUserAgent
        );
        assert!("cookie".parse::<ClientKeyStrategy>().is_err());
    }

    #[test]
    fn test_client_key_uses_trusted_forwarded_for() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "203.0.113.7, 10.0.0.1"))
            .to_http_request();
        let config = RateLimitConfig {
            trust_forwarded_for: true,
            ..Default::default()
        };
        assert_eq!(client_key(&req, &config), "rate_limit:ip:203.0.113.7");
    }

    #[test]
    fn test_client_key_ignores_forwarded_for_by_default() {
        let peer = "198.51.100.2:4000".parse().unwrap();
        let keys: Vec<String> = ["203.0.113.7", "203.0.113.8"]
            .iter()
            .map(|spoofed| {
                let req = TestRequest::default()
                    .insert_header(("X-Forwarded-For", *spoofed))
                    .peer_addr(peer)
                    .to_http_request();
                client_key(&req, &RateLimitConfig::default())
            })
            .collect();
        assert_eq!(keys[0], "rate_limit:ip:198.51.100.2");
        assert_eq!(keys[0], keys[1]);
    }

    #[test]
    fn test_client_key_with_user_agent() {
        let config = RateLimitConfig {
            key_strategy: ClientKeyStrategy::IpUserAgent,
            trust_forwarded_for: true,
            ..Default::default()
        };
        let firefox = TestRequest::default()
            .insert_header(("X-Forwarded-For", "203.0.113.7"))
            .insert_header(("User-Agent", "Firefox"))
            .to_http_request();
        let curl = TestRequest::default()
            .insert_header(("X-Forwarded-For", "203.0.113.7"))
            .insert_header(("User-Agent", "curl/8.0"))
            .to_http_request();

        let a = client_key(&firefox, &config);
        let b = client_key(&curl, &config);
        assert!(a.starts_with("rate_limit:ip_ua:203.0.113.7:"));
        assert_ne!(a, b);
    }
}
