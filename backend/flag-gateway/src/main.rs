/// Flag Gateway - HTTP Server
///
/// Resolves a country identifier to a signed flag-image URL, shielding the
/// image origin with a cache, request coalescing and per-client rate limits.
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use flag_gateway::handlers;
use flag_gateway::middleware::{cors, cors_headers, spawn_sweeper};
use flag_gateway::services::{HttpOriginProbe, OriginProbe, StaticCountryLookup};
use flag_gateway::{Config, FlagGateway};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flag_gateway=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(true),
        )
        .init();

    info!("Starting Flag Gateway...");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(origin = ?config.origin, "Configuration loaded");

    let probe: Option<Arc<dyn OriginProbe>> = if config.origin.verify {
        let probe = HttpOriginProbe::new(config.origin.timeout)
            .context("Failed to build origin HTTP client")?;
        Some(Arc::new(probe) as Arc<dyn OriginProbe>)
    } else {
        None
    };

    let gateway = FlagGateway::new(&config, Arc::new(StaticCountryLookup::new()), probe)
        .context("Failed to initialize URL signer")?;
    let gateway = web::Data::new(gateway);

    let sweeper = spawn_sweeper(gateway.limiter().clone());

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Flag Gateway listening on {}", bind_addr);

    let result = HttpServer::new(move || {
        App::new()
            .app_data(gateway.clone())
            .wrap(cors_headers())
            .wrap(Logger::default())
            .configure(handlers::configure)
            .default_service(web::to(cors::fallback))
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run()
    .await;

    sweeper.abort();
    info!("Flag Gateway stopped");

    result.context("HTTP server error")
}
