//! Permissive cross-origin headers and preflight handling
//!
//! Every response carries the same CORS headers (including error responses,
//! since `DefaultHeaders` runs after handler errors are rendered).

use actix_web::{http::Method, middleware::DefaultHeaders, HttpRequest, HttpResponse};

use crate::models::ApiResponse;

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_METHODS: &str = "GET, OPTIONS";
pub const ALLOW_HEADERS: &str = "Content-Type";

/// Headers applied to every response
pub fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", ALLOW_ORIGIN))
        .add(("Access-Control-Allow-Methods", ALLOW_METHODS))
        .add(("Access-Control-Allow-Headers", ALLOW_HEADERS))
}

/// `OPTIONS` on any path
pub async fn preflight() -> HttpResponse {
    HttpResponse::NoContent()
        .insert_header(("Access-Control-Max-Age", "86400"))
        .finish()
}

/// Default service: preflight for `OPTIONS`, JSON 404 otherwise
pub async fn fallback(req: HttpRequest) -> HttpResponse {
    if *req.method() == Method::OPTIONS {
        return preflight().await;
    }
    HttpResponse::NotFound().json(ApiResponse::failure("Not found."))
}

/// Any other method on a known resource
pub async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed()
        .insert_header(("Allow", ALLOW_METHODS))
        .json(ApiResponse::failure("Method not allowed."))
}
