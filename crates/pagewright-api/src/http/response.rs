//! Envelope response format for all API responses.
//!
//! Every JSON response is wrapped in a consistent envelope:
//! ```json
//! {
//!   "data": { ... },
//!   "meta": { "request_id": "...", "timestamp": "...", "response_time_ms": 5 },
//!   "errors": [],
//!   "_links": { "self": "..." }
//! }
//! ```
//! Errors use the same shape, built by [`crate::http::error::AppError`].

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;

/// Envelope response wrapping all API data.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    pub meta: ApiMeta,

    /// Always empty on success.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiErrorDetail>,

    #[serde(rename = "_links", skip_serializing_if = "HashMap::is_empty")]
    pub links: HashMap<String, String>,
}

/// Metadata included in every response.
#[derive(Debug, Serialize)]
pub struct ApiMeta {
    /// UUID v7 request identifier.
    pub request_id: String,
    pub timestamp: String,
    pub response_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    /// Success envelope; `started` is when the handler began.
    pub fn success(data: T, started: Instant) -> Self {
        Self {
            data: Some(data),
            meta: ApiMeta {
                request_id: uuid::Uuid::now_v7().to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                response_time_ms: started.elapsed().as_millis() as u64,
            },
            errors: Vec::new(),
            links: HashMap::new(),
        }
    }

    pub fn with_link(mut self, rel: &str, href: impl Into<String>) -> Self {
        self.links.insert(rel.to_string(), href.into());
        self
    }
}

impl ApiResponse<()> {
    /// Error envelope with a single error entry and no data.
    pub fn failure(code: &str, message: String) -> Self {
        Self {
            data: None,
            meta: ApiMeta {
                request_id: uuid::Uuid::now_v7().to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                response_time_ms: 0,
            },
            errors: vec![ApiErrorDetail {
                code: code.to_string(),
                message,
            }],
            links: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() {
        let resp = ApiResponse::success(serde_json::json!({"id": 1}), Instant::now())
            .with_link("self", "/api/v1/projects/1");
        let json = serde_json::to_value(&resp).unwrap();

        assert_eq!(json["data"]["id"], 1);
        assert!(json.get("errors").is_none());
        assert_eq!(json["_links"]["self"], "/api/v1/projects/1");
        assert_eq!(json["meta"]["request_id"].as_str().unwrap().len(), 36);
    }

    #[test]
    fn test_failure_envelope_has_null_data() {
        let json = serde_json::to_value(ApiResponse::failure("NOT_FOUND", "gone".into())).unwrap();
        assert!(json.get("data").is_none());
        assert_eq!(json["errors"][0]["code"], "NOT_FOUND");
        assert_eq!(json["errors"][0]["message"], "gone");
    }
}
