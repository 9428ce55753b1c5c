//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (pagewright-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod project;

/// Sort order for list queries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}
