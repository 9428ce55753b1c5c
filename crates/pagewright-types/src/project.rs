use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::error::ProjectError;

/// Unique identifier for a project, wrapping a UUID v7 (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
    /// Create a new ProjectId using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A landing-page project: the target of a build session.
///
/// A build can only be started against a project that already exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    /// Display name of the product or page.
    pub name: String,
    /// Short product context, handed to the agent as part of its prompt.
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            name: name.into(),
            description,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Longest accepted project name, in characters.
pub const MAX_PROJECT_NAME_LEN: usize = 100;

/// Request payload for creating a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateProjectRequest {
    /// Validate and build the project. Whitespace is trimmed and a blank
    /// description is dropped.
    pub fn into_project(self) -> Result<Project, ProjectError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ProjectError::InvalidName("name must not be empty".to_string()));
        }
        if name.chars().count() > MAX_PROJECT_NAME_LEN {
            return Err(ProjectError::InvalidName(format!(
                "name must be at most {MAX_PROJECT_NAME_LEN} characters"
            )));
        }
        let description = self
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        Ok(Project::new(name, description))
    }
}
