//! Comment model, owned by a parent task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A comment under a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub task_id: String,
    /// Author display name at posting time
    pub username: String,
    pub user_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Request body for posting a comment.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCommentRequest {
    pub text: String,
}
