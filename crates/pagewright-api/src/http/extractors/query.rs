//! Query parameter extractors for list endpoints.

use serde::Deserialize;

/// Query parameters for the project list endpoint.
#[derive(Debug, Deserialize)]
pub struct ProjectListQuery {
    /// Sort order on creation time (asc, desc).
    #[serde(default = "default_order")]
    pub order: String,
    pub limit: Option<i64>,
    /// Offset for pagination.
    pub offset: Option<i64>,
}

fn default_order() -> String {
    "desc".to_string()
}
