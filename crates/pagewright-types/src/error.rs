use thiserror::Error;

/// Errors related to project operations.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("project not found")]
    NotFound,

    #[error("invalid project name: {0}")]
    InvalidName(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

/// Errors from repository operations (used by trait definitions in pagewright-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_error_display() {
        let err = ProjectError::InvalidName("name must not be empty".to_string());
        assert_eq!(err.to_string(), "invalid project name: name must not be empty");
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
        let err = RepositoryError::Conflict("stale version 3".to_string());
        assert_eq!(err.to_string(), "conflict: stale version 3");
    }
}
