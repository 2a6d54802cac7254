/// HTTP handlers for flag-gateway
///
/// Routes:
/// - `GET /api/getFlag` (plus `OPTIONS` preflight, JSON 405 for other methods)
/// - `GET /health`
/// - `GET /metrics`
pub mod flags;

pub use flags::get_flag;

use actix_web::{error::QueryPayloadError, http::Method, web, HttpRequest, HttpResponse};

use crate::error::GatewayError;
use crate::metrics::metrics_handler;
use crate::middleware::cors;

/// Malformed query strings are validation failures, rendered like any other
fn query_error(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    tracing::debug!(error = %err, "Rejected malformed query string");
    GatewayError::Validation("Invalid query string.".to_string()).into()
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

/// Register all routes on an `App`
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::QueryConfig::default().error_handler(query_error))
        .service(
            web::resource("/api/getFlag")
                .route(web::get().to(get_flag))
                .route(web::method(Method::OPTIONS).to(cors::preflight))
                .default_service(web::to(cors::method_not_allowed)),
        )
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics_handler));
}
