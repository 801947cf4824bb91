//! Database repository shared by every collection.
//!
//! Uses prepared statements and transactions for data integrity. Collection-specific operations
//! live in sibling modules as further `impl Repository` blocks. Every committed write bumps the
//! store revision once and is announced on the change feed.

use sqlx::{Row, SqliteConnection, SqlitePool};

use super::decode::{format_time, now};
use crate::errors::AppError;
use crate::feed::{ChangeEvent, ChangeFeed};
use crate::models::RevisionInfo;

/// Default number of re-attempts for a versioned write that lost a race.
pub const DEFAULT_MAX_WRITE_RETRIES: u32 = 5;

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pub(super) pool: SqlitePool,
    pub(super) feed: ChangeFeed,
    pub(super) max_write_retries: u32,
}

impl Repository {
    pub fn new(pool: SqlitePool, feed: ChangeFeed) -> Self {
        Self {
            pool,
            feed,
            max_write_retries: DEFAULT_MAX_WRITE_RETRIES,
        }
    }

    pub fn with_max_write_retries(mut self, retries: u32) -> Self {
        self.max_write_retries = retries;
        self
    }

    /// The feed this repository announces its writes on.
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    /// Get revision info.
    pub async fn get_revision_info(&self) -> Result<RevisionInfo, AppError> {
        let row = sqlx::query("SELECT revision_id, generated_at FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(RevisionInfo {
            revision_id: row.get("revision_id"),
            generated_at: row.get("generated_at"),
        })
    }

    /// Announce committed changes on the feed.
    pub(super) fn announce(&self, events: impl IntoIterator<Item = ChangeEvent>) {
        for event in events {
            self.feed.publish(event);
        }
    }
}

/// Increment the revision inside the caller's transaction and return the new value.
pub(super) async fn bump_revision(conn: &mut SqliteConnection) -> Result<i64, AppError> {
    let row = sqlx::query(
        "UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1 RETURNING revision_id",
    )
    .bind(format_time(&now()))
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.get("revision_id"))
}
