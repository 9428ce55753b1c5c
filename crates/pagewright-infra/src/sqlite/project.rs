//! SQLite project repository implementation.
//!
//! Implements `ProjectRepository` from `pagewright-core` using sqlx with split read/write pools.

use pagewright_core::repository::SortOrder;
use pagewright_core::repository::project::{ProjectFilter, ProjectRepository};
use pagewright_types::error::RepositoryError;
use pagewright_types::project::{Project, ProjectId};
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime};

/// SQLite-backed implementation of `ProjectRepository`.
pub struct SqliteProjectRepository {
    pool: DatabasePool,
}

impl SqliteProjectRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Internal row type for mapping SQLite rows to domain Project.
struct ProjectRow {
    id: String,
    name: String,
    description: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ProjectRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_project(self) -> Result<Project, RepositoryError> {
        let id = self
            .id
            .parse::<ProjectId>()
            .map_err(|e| RepositoryError::Query(format!("invalid project id: {e}")))?;

        Ok(Project {
            id,
            name: self.name,
            description: self.description,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

impl ProjectRepository for SqliteProjectRepository {
    async fn create(&self, project: &Project) -> Result<Project, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO projects (id, name, description, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(project.id.to_string())
        .bind(&project.name)
        .bind(&project.description)
        .bind(format_datetime(&project.created_at))
        .bind(format_datetime(&project.updated_at))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(project.clone()),
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => Err(
                RepositoryError::Conflict(format!("project '{}' already exists", project.id)),
            ),
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn get_by_id(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let project_row =
                    ProjectRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(project_row.into_project()?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, filter: Option<ProjectFilter>) -> Result<Vec<Project>, RepositoryError> {
        let filter = filter.unwrap_or_default();

        let order = match filter.sort_order.unwrap_or_default() {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let mut sql = format!("SELECT * FROM projects ORDER BY created_at {order}, id {order}");

        // SQLite needs a LIMIT before it accepts an OFFSET.
        match (filter.limit, filter.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut projects = Vec::with_capacity(rows.len());
        for row in &rows {
            let project_row =
                ProjectRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            projects.push(project_row.into_project()?);
        }

        Ok(projects)
    }

    async fn delete(&self, id: &ProjectId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }
}
