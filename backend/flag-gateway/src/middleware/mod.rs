/// Request-surface concerns for flag-gateway
pub mod cors;
pub mod rate_limit;

pub use cors::cors_headers;
pub use rate_limit::{
    client_key, spawn_sweeper, ClientKeyStrategy, RateLimitConfig, RateLimitDecision, RateLimiter,
};
