//! Comment operations.

use sqlx::sqlite::SqliteRow;

use super::decode::{decode_all, format_time, now, RowReader};
use super::repository::bump_revision;
use super::Repository;
use crate::errors::AppError;
use crate::feed::{ChangeEvent, Collection};
use crate::models::{Comment, UserProfile};

impl Repository {
    /// List a task's comments, oldest first.
    pub async fn list_comments(&self, task_id: &str) -> Result<Vec<Comment>, AppError> {
        let rows = sqlx::query(
            "SELECT id, task_id, username, user_id, text, created_at FROM comments WHERE task_id = ? ORDER BY created_at, id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_all(&rows, comment_from_row))
    }

    /// Post a comment under an existing task.
    pub async fn create_comment(
        &self,
        task_id: &str,
        author: &UserProfile,
        text: &str,
    ) -> Result<Comment, AppError> {
        self.require_task(task_id).await?;

        let comment = Comment {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            username: author.nickname.clone(),
            user_id: author.id.clone(),
            text: text.trim().to_string(),
            created_at: now(),
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO comments (id, task_id, username, user_id, text, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&comment.id)
        .bind(&comment.task_id)
        .bind(&comment.username)
        .bind(&comment.user_id)
        .bind(&comment.text)
        .bind(format_time(&comment.created_at))
        .execute(&mut *tx)
        .await?;
        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        self.announce([
            ChangeEvent::new(revision, Collection::Comments, &comment.id).with_parent(task_id)
        ]);

        Ok(comment)
    }
}

fn comment_from_row(row: &SqliteRow) -> Result<Comment, AppError> {
    let r = RowReader::new(row, "comments");
    Ok(Comment {
        id: r.get("id")?,
        task_id: r.get("task_id")?,
        username: r.get("username")?,
        user_id: r.get("user_id")?,
        text: r.get("text")?,
        created_at: r.time("created_at")?,
    })
}
