/// Response bodies for the public API
use serde::{Deserialize, Serialize};

/// Query string of `GET /api/getFlag`
#[derive(Debug, Clone, Deserialize)]
pub struct FlagQuery {
    pub country: Option<String>,
}

/// `{ "success": true, "secureUrl": "..." }` or `{ "success": false, "message": "..." }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(rename = "secureUrl", skip_serializing_if = "Option::is_none", default)]
    pub secure_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

impl ApiResponse {
    pub fn success(secure_url: impl Into<String>) -> Self {
        Self {
            success: true,
            secure_url: Some(secure_url.into()),
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            secure_url: None,
            message: Some(message.into()),
        }
    }
}
