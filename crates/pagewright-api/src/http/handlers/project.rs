//! Project handlers for the REST API.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};

use pagewright_core::repository::SortOrder;
use pagewright_core::repository::project::{ProjectFilter, ProjectRepository};
use pagewright_types::error::ProjectError;
use pagewright_types::project::{CreateProjectRequest, Project, ProjectId};

use crate::http::error::AppError;
use crate::http::extractors::query::ProjectListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Parse a path id; an unparseable id is reported as an unknown project.
pub fn parse_project_id(raw: &str) -> Result<ProjectId, AppError> {
    raw.parse::<ProjectId>()
        .map_err(|_| AppError::Project(ProjectError::NotFound))
}

/// Load a project or fail with 404.
pub async fn find_project(state: &AppState, raw_id: &str) -> Result<Project, AppError> {
    let id = parse_project_id(raw_id)?;
    state
        .projects
        .get_by_id(&id)
        .await?
        .ok_or(AppError::Project(ProjectError::NotFound))
}

/// POST /api/v1/projects - Create a project.
pub async fn create_project(
    State(state): State<AppState>,
    Json(body): Json<CreateProjectRequest>,
) -> Result<Json<ApiResponse<Project>>, AppError> {
    let start = Instant::now();

    let project = state.projects.create(&body.into_project()?).await?;
    tracing::info!(project_id = %project.id, name = %project.name, "project created");

    let id = project.id;
    let resp = ApiResponse::success(project, start)
        .with_link("self", format!("/api/v1/projects/{id}"))
        .with_link("build", format!("/api/v1/projects/{id}/build"));
    Ok(Json(resp))
}

/// GET /api/v1/projects - List projects, newest first by default.
pub async fn list_projects(
    State(state): State<AppState>,
    Query(query): Query<ProjectListQuery>,
) -> Result<Json<ApiResponse<Vec<Project>>>, AppError> {
    let start = Instant::now();

    let sort_order = match query.order.to_lowercase().as_str() {
        "asc" => SortOrder::Asc,
        "desc" => SortOrder::Desc,
        other => {
            return Err(AppError::Validation(format!(
                "invalid order '{other}', expected asc or desc"
            )));
        }
    };
    let filter = ProjectFilter {
        sort_order: Some(sort_order),
        limit: query.limit,
        offset: query.offset,
    };

    let projects = state.projects.list(Some(filter)).await?;
    Ok(Json(
        ApiResponse::success(projects, start).with_link("self", "/api/v1/projects"),
    ))
}

/// GET /api/v1/projects/{id} - Get a project.
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Project>>, AppError> {
    let start = Instant::now();
    let project = find_project(&state, &id).await?;

    let id = project.id;
    Ok(Json(
        ApiResponse::success(project, start)
            .with_link("self", format!("/api/v1/projects/{id}"))
            .with_link("build", format!("/api/v1/projects/{id}/build"))
            .with_link("deployment", format!("/api/v1/projects/{id}/deployment")),
    ))
}
