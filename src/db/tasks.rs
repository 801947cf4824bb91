//! Task operations, including the versioned read-modify-write loop behind the
//! interest/acceptance workflow.

use sqlx::sqlite::SqliteRow;

use super::decode::{decode_all, encode_ids, format_time, now, RowReader};
use super::repository::bump_revision;
use super::Repository;
use crate::errors::AppError;
use crate::feed::{ChangeEvent, Collection};
use crate::models::{CreateTaskRequest, Task, TaskStatus, UserProfile};

const TASK_COLUMNS: &str = "id, user_id, username, title, description, created_at, reward, image_url, status, like_user_ids, interested_user_ids, accepted_user_ids, max_accepted, version";

impl Repository {
    /// List all tasks, newest first.
    pub async fn list_tasks(&self) -> Result<Vec<Task>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks ORDER BY created_at DESC, id DESC",
            TASK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_all(&rows, task_from_row))
    }

    /// Get a task by ID.
    pub async fn get_task(&self, id: &str) -> Result<Option<Task>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    /// Get a task that must exist.
    pub async fn require_task(&self, id: &str) -> Result<Task, AppError> {
        self.get_task(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", id)))
    }

    /// Post a new task owned by `owner`.
    pub async fn create_task(
        &self,
        owner: &UserProfile,
        request: &CreateTaskRequest,
    ) -> Result<Task, AppError> {
        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: owner.id.clone(),
            username: owner.nickname.clone(),
            title: request.title.trim().to_string(),
            description: request.description.trim().to_string(),
            created_at: now(),
            reward: request.reward.trim().to_string(),
            image_url: request.image_url.clone(),
            status: TaskStatus::Available,
            like_user_ids: Vec::new(),
            interested_user_ids: Vec::new(),
            accepted_user_ids: Vec::new(),
            max_accepted: request.max_accepted,
            version: 1,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, '[]', '[]', '[]', ?, 1)",
            TASK_COLUMNS
        ))
        .bind(&task.id)
        .bind(&task.user_id)
        .bind(&task.username)
        .bind(&task.title)
        .bind(&task.description)
        .bind(format_time(&task.created_at))
        .bind(&task.reward)
        .bind(&task.image_url)
        .bind(task.status.as_str())
        .bind(task.max_accepted)
        .execute(&mut *tx)
        .await?;
        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        self.announce([ChangeEvent::new(revision, Collection::Tasks, &task.id)]);

        Ok(task)
    }

    /// Apply `transition` to a task and persist the result atomically.
    ///
    /// The task is read, transformed, and written back with a conditional update on its version.
    /// A write that loses a race re-reads and re-applies `transition`, up to the configured retry
    /// budget. With `expected_version` set, a stale version fails immediately instead.
    /// A transition that leaves the task unchanged writes nothing.
    pub async fn mutate_task<T, F>(
        &self,
        id: &str,
        expected_version: Option<i64>,
        mut transition: F,
    ) -> Result<(Task, T), AppError>
    where
        F: FnMut(&mut Task) -> Result<T, AppError>,
    {
        let mut attempts: u32 = 0;

        loop {
            let existing = self.require_task(id).await?;

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

            let mut updated = existing.clone();
            let outcome = transition(&mut updated)?;
            if updated == existing {
                return Ok((existing, outcome));
            }
            updated.version = existing.version + 1;

            let mut tx = self.pool.begin().await?;
            let result = sqlx::query(
                r#"UPDATE tasks SET
                    status = ?, like_user_ids = ?, interested_user_ids = ?, accepted_user_ids = ?,
                    version = ?
                WHERE id = ? AND version = ?"#,
            )
            .bind(updated.status.as_str())
            .bind(encode_ids(&updated.like_user_ids)?)
            .bind(encode_ids(&updated.interested_user_ids)?)
            .bind(encode_ids(&updated.accepted_user_ids)?)
            .bind(updated.version)
            .bind(id)
            .bind(existing.version)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                attempts += 1;
                if expected_version.is_some() || attempts > self.max_write_retries {
                    let current = self.get_task(id).await?;
                    return Err(AppError::Conflict {
                        message: format!("Concurrent modification detected for task {}", id),
                        current_version: current.map(|t| t.version).unwrap_or(0),
                    });
                }
                tracing::debug!(task_id = %id, attempts, "task write lost a race, retrying");
                continue;
            }

            let revision = bump_revision(&mut tx).await?;
            tx.commit().await?;

            self.announce([ChangeEvent::new(revision, Collection::Tasks, id)]);

            return Ok((updated, outcome));
        }
    }
}

pub(super) fn task_from_row(row: &SqliteRow) -> Result<Task, AppError> {
    let r = RowReader::new(row, "tasks");
    let max_accepted: i64 = r.get("max_accepted")?;
    if max_accepted < 1 {
        return Err(AppError::Decode(format!(
            "Invalid tasks.max_accepted for record {}: {}",
            r.get::<String>("id")?,
            max_accepted
        )));
    }

    Ok(Task {
        id: r.get("id")?,
        user_id: r.get("user_id")?,
        username: r.get("username")?,
        title: r.get("title")?,
        description: r.get("description")?,
        created_at: r.time("created_at")?,
        reward: r.get("reward")?,
        image_url: r.get("image_url")?,
        status: r.label("status", TaskStatus::parse)?,
        like_user_ids: r.ids("like_user_ids")?,
        interested_user_ids: r.ids("interested_user_ids")?,
        accepted_user_ids: r.ids("accepted_user_ids")?,
        max_accepted,
        version: r.get("version")?,
    })
}
