//! Flag Gateway Library
//! Re-exports modules for testing and integration

pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::GatewayError;
pub use services::FlagGateway;
