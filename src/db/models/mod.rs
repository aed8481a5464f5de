pub mod label;
pub mod owner;
pub mod project;
pub mod task;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use label::Label;
pub use owner::{Owner, OwnerProfile};
pub use project::{NewProject, Project};
pub use task::{Task, TaskFilter, TaskPriority, TaskRecord, TaskStatus};

/// Position in a `(created_at, id)`-ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keyset {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

/// Outcome of a soft delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub id: Uuid,
    pub deleted_at: DateTime<Utc>,
}
