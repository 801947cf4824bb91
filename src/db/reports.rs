//! Report moderation operations.

use sqlx::sqlite::SqliteRow;

use super::decode::{decode_all, format_time, now, RowReader};
use super::repository::bump_revision;
use super::Repository;
use crate::errors::AppError;
use crate::feed::{ChangeEvent, Collection};
use crate::models::{BanOutcome, CreateReportRequest, Report, ReportStatus};

const REPORT_COLUMNS: &str =
    "id, reported_user_id, reporter_user_id, reason, created_at, status, version";

impl Repository {
    /// List reports newest first, optionally only those in `status`.
    pub async fn list_reports(&self, status: Option<ReportStatus>) -> Result<Vec<Report>, AppError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM reports WHERE status = ? ORDER BY created_at DESC, id DESC",
                    REPORT_COLUMNS
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM reports ORDER BY created_at DESC, id DESC",
                    REPORT_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(decode_all(&rows, report_from_row))
    }

    /// Get a report by ID.
    pub async fn get_report(&self, id: &str) -> Result<Option<Report>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM reports WHERE id = ?", REPORT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(report_from_row).transpose()
    }

    /// File a report from `reporter_id`.
    pub async fn create_report(
        &self,
        reporter_id: &str,
        request: &CreateReportRequest,
    ) -> Result<Report, AppError> {
        let report = Report {
            id: uuid::Uuid::new_v4().to_string(),
            reported_user_id: request.reported_user_id.clone(),
            reporter_user_id: reporter_id.to_string(),
            reason: request.reason.trim().to_string(),
            created_at: now(),
            status: ReportStatus::Pending,
            version: 1,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO reports ({}) VALUES (?, ?, ?, ?, ?, ?, 1)",
            REPORT_COLUMNS
        ))
        .bind(&report.id)
        .bind(&report.reported_user_id)
        .bind(&report.reporter_user_id)
        .bind(&report.reason)
        .bind(format_time(&report.created_at))
        .bind(report.status.as_str())
        .execute(&mut *tx)
        .await?;
        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(
            report_id = %report.id,
            reported_user_id = %report.reported_user_id,
            "report filed"
        );
        self.announce([ChangeEvent::new(revision, Collection::Reports, &report.id)]);

        Ok(report)
    }

    /// Overwrite a report's status with optimistic concurrency control.
    pub async fn update_report_status(
        &self,
        id: &str,
        status: ReportStatus,
        expected_version: Option<i64>,
    ) -> Result<Report, AppError> {
        let existing = self
            .get_report(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Report {} not found", id)))?;

        if let Some(expected) = expected_version {
            if existing.version != expected {
                return Err(AppError::Conflict {
                    message: format!(
                        "Version mismatch: expected {}, current {}",
                        expected, existing.version
                    ),
                    current_version: existing.version,
                });
            }
        }

        let new_version = existing.version + 1;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE reports SET status = ?, version = ? WHERE id = ? AND version = ?")
            .bind(status.as_str())
            .bind(new_version)
            .bind(id)
            .bind(existing.version)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            let current = self.get_report(id).await?;
            return Err(AppError::Conflict {
                message: "Concurrent modification detected".to_string(),
                current_version: current.map(|r| r.version).unwrap_or(0),
            });
        }

        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        if status.is_closed() {
            tracing::info!(report_id = %id, status = status.as_str(), "report closed");
        }
        self.announce([ChangeEvent::new(revision, Collection::Reports, id)]);

        Ok(Report {
            status,
            version: new_version,
            ..existing
        })
    }

    /// Delete a report.
    pub async fn delete_report(&self, id: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM reports WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Report {} not found", id)));
        }

        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        self.announce([ChangeEvent::new(revision, Collection::Reports, id)]);
        Ok(())
    }

    /// Set a user's ban flag.
    ///
    /// Banning also marks every report against the user `resolved`, dismissed ones included. Both
    /// changes commit in one transaction.
    pub async fn set_ban(&self, user_id: &str, banned: bool) -> Result<BanOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE profiles SET is_banned = ?, updated_at = ?, version = version + 1 WHERE id = ?",
        )
        .bind(banned as i32)
        .bind(format_time(&now()))
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Profile {} not found", user_id)));
        }

        let resolved_reports = if banned {
            sqlx::query(
                "UPDATE reports SET status = ?, version = version + 1 WHERE reported_user_id = ? AND status <> ?",
            )
            .bind(ReportStatus::Resolved.as_str())
            .bind(user_id)
            .bind(ReportStatus::Resolved.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected()
        } else {
            0
        };

        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(user_id = %user_id, banned, resolved_reports, "ban flag updated");

        let mut events = vec![ChangeEvent::new(revision, Collection::Profiles, user_id)];
        if resolved_reports > 0 {
            events.push(ChangeEvent::new(revision, Collection::Reports, user_id));
        }
        self.announce(events);

        let profile = self.require_profile(user_id).await?;
        Ok(BanOutcome {
            profile,
            resolved_reports,
        })
    }
}

fn report_from_row(row: &SqliteRow) -> Result<Report, AppError> {
    let r = RowReader::new(row, "reports");
    Ok(Report {
        id: r.get("id")?,
        reported_user_id: r.get("reported_user_id")?,
        reporter_user_id: r.get("reporter_user_id")?,
        reason: r.get("reason")?,
        created_at: r.time("created_at")?,
        status: r.label("status", ReportStatus::parse)?,
        version: r.get("version")?,
    })
}
