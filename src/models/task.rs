//! Task model: a posted micro-job with a reward, owner and acceptance capacity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ProfileSummary;

/// Status derived from the accepted set versus capacity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    Available,
    Assigned,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Available => "Available",
            TaskStatus::Assigned => "Assigned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Available" => Some(TaskStatus::Available),
            "Assigned" => Some(TaskStatus::Assigned),
            _ => None,
        }
    }
}

/// A task posted by a student.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    /// Owning user id
    pub user_id: String,
    /// Owner display name at posting time
    pub username: String,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub reward: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub status: TaskStatus,
    pub like_user_ids: Vec<String>,
    pub interested_user_ids: Vec<String>,
    pub accepted_user_ids: Vec<String>,
    pub max_accepted: i64,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

fn default_max_accepted() -> i64 {
    1
}

/// Request body for posting a new task.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: String,
    pub reward: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default = "default_max_accepted")]
    pub max_accepted: i64,
}

/// Request body for accepting an interested user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptRequest {
    pub user_id: String,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// The "My Tasks" views.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskFilter {
    /// Tasks the caller posted
    Created,
    /// Tasks the caller was accepted for
    Accepted,
    /// Tasks the caller liked
    Favorites,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task, user_id: &str) -> bool {
        match self {
            TaskFilter::Created => task.user_id == user_id,
            TaskFilter::Accepted => task.accepted_user_ids.iter().any(|id| id == user_id),
            TaskFilter::Favorites => task.like_user_ids.iter().any(|id| id == user_id),
        }
    }
}

/// Query parameters for listing tasks.
#[derive(Debug, Clone, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub filter: Option<TaskFilter>,
}

/// Result of toggling a like.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResponse {
    pub liked: bool,
    pub like_count: usize,
    pub task: Task,
}

/// An interested user as the task owner sees them.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestedUser {
    pub user_id: String,
    /// Absent when the user never registered a profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileSummary>,
    pub accepted: bool,
}
