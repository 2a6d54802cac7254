/// Flag lookup handler - `GET /api/getFlag?country=<code or name>`
use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::Result;
use crate::middleware::rate_limit::{client_key, RateLimitDecision};
use crate::models::{ApiResponse, FlagQuery};
use crate::services::FlagGateway;

/// Resolve a country to a signed flag URL
pub async fn get_flag(
    req: HttpRequest,
    gateway: web::Data<FlagGateway>,
    query: web::Query<FlagQuery>,
) -> Result<HttpResponse> {
    let key = client_key(&req, gateway.rate_limit_config());
    let resolved = gateway.get_flag(query.country.as_deref(), &key).await?;

    let mut response = HttpResponse::Ok();
    response.insert_header(("X-Cache", resolved.cache_status.as_str()));
    if let RateLimitDecision::Allowed {
        limit, remaining, ..
    } = resolved.rate_limit
    {
        response
            .insert_header(("X-RateLimit-Limit", limit.to_string()))
            .insert_header(("X-RateLimit-Remaining", remaining.to_string()));
    }

    Ok(response.json(ApiResponse::success(resolved.secure_url)))
}
