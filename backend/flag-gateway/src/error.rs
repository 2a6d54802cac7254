/// Error types for flag-gateway
///
/// Only this module maps failures to HTTP. Every error renders the same JSON
/// shape as a failed lookup: `{ "success": false, "message": "..." }`.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::time::Duration;

use crate::models::ApiResponse;
use crate::services::origin::OriginError;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing or unresolvable country identifier
    #[error("{0}")]
    Validation(String),

    #[error("Rate limit exceeded.")]
    RateLimited { limit: u32, retry_after: Duration },

    #[error(transparent)]
    Origin(#[from] OriginError),

    /// Waited longer than the per-request budget
    #[error("Timed out after {0:?} waiting for origin")]
    Timeout(Duration),
}

impl GatewayError {
    /// Message sent to the client
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::Validation(msg) => msg.clone(),
            GatewayError::RateLimited { .. } => self.to_string(),
            GatewayError::Origin(OriginError::NotFound(country)) => {
                format!("No flag available for country '{}'.", country)
            }
            GatewayError::Origin(_) => "Failed to retrieve flag from origin.".to_string(),
            GatewayError::Timeout(_) => "Timed out retrieving flag.".to_string(),
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Origin(OriginError::NotFound(_)) => StatusCode::BAD_REQUEST,
            GatewayError::Origin(_) | GatewayError::Timeout(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());

        if let GatewayError::RateLimited { limit, retry_after } = self {
            // Round up so clients never retry inside the current window
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .insert_header(("Retry-After", secs.to_string()))
                .insert_header(("X-RateLimit-Limit", limit.to_string()))
                .insert_header(("X-RateLimit-Remaining", "0"));
        }

        response.json(ApiResponse::failure(self.public_message()))
    }
}
