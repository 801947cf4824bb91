//! Abuse report model and moderation requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserProfile;

/// Moderation state of a report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    #[default]
    Pending,
    Investigating,
    Resolved,
    Dismissed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Investigating => "investigating",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReportStatus::Pending),
            "investigating" => Some(ReportStatus::Investigating),
            "resolved" => Some(ReportStatus::Resolved),
            "dismissed" => Some(ReportStatus::Dismissed),
            _ => None,
        }
    }

    /// Whether a moderator has closed the report.
    pub fn is_closed(&self) -> bool {
        matches!(self, ReportStatus::Resolved | ReportStatus::Dismissed)
    }
}

/// A report filed by one user against another.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub reported_user_id: String,
    pub reporter_user_id: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub status: ReportStatus,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

/// Request body for filing a report.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReportRequest {
    pub reported_user_id: String,
    pub reason: String,
}

/// Request body for moving a report to another status.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReportRequest {
    pub status: ReportStatus,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Query parameters for the admin report list.
#[derive(Debug, Clone, Deserialize)]
pub struct ListReportsQuery {
    #[serde(default)]
    pub status: Option<ReportStatus>,
}

/// Request body for setting a user's ban flag.
#[derive(Debug, Clone, Deserialize)]
pub struct BanUserRequest {
    pub banned: bool,
}

/// Outcome of a ban: the updated profile and how many reports were closed with it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BanOutcome {
    pub profile: UserProfile,
    pub resolved_reports: u64,
}
