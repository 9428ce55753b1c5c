//! Project repository trait definition.

use pagewright_types::error::RepositoryError;
use pagewright_types::project::{Project, ProjectId};

use super::SortOrder;

/// Filter criteria for listing projects.
#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    /// Sort direction on `created_at`.
    pub sort_order: Option<SortOrder>,
    /// Maximum number of results.
    pub limit: Option<i64>,
    /// Number of results to skip (offset pagination).
    pub offset: Option<i64>,
}

/// Repository trait for project persistence.
///
/// Implementations live in pagewright-infra (e.g., SqliteProjectRepository).
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ProjectRepository: Send + Sync {
    /// Create a new project. Returns the created project.
    fn create(
        &self,
        project: &Project,
    ) -> impl std::future::Future<Output = Result<Project, RepositoryError>> + Send;

    fn get_by_id(
        &self,
        id: &ProjectId,
    ) -> impl std::future::Future<Output = Result<Option<Project>, RepositoryError>> + Send;

    fn list(
        &self,
        filter: Option<ProjectFilter>,
    ) -> impl std::future::Future<Output = Result<Vec<Project>, RepositoryError>> + Send;

    /// Permanently delete a project by ID.
    fn delete(
        &self,
        id: &ProjectId,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
