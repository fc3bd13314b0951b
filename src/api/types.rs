//! API request and response types.

use serde::Serialize;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" or "unhealthy"
    pub status: String,

    /// RFC 3339 time the check ran
    pub timestamp: String,

    /// "available" or "missing"
    pub cache: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: crate::util::now_string(),
            cache: "available".to_string(),
            error: None,
        }
    }

    pub fn cache_missing() -> Self {
        Self {
            status: "unhealthy".to_string(),
            timestamp: crate::util::now_string(),
            cache: "missing".to_string(),
            error: Some("Cache directory not found".to_string()),
        }
    }
}
