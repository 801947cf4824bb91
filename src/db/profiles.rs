//! Profile operations.

use sqlx::sqlite::SqliteRow;

use super::decode::{format_time, now, RowReader};
use super::repository::bump_revision;
use super::Repository;
use crate::errors::AppError;
use crate::feed::{ChangeEvent, Collection};
use crate::models::{RegisterProfileRequest, UpdateProfileRequest, UserProfile};

const PROFILE_COLUMNS: &str = "id, display_name, nickname, faculty, student_id, bio, profile_image_url, is_banned, is_admin, created_at, updated_at, version";

impl Repository {
    /// Get a profile by user ID.
    pub async fn get_profile(&self, id: &str) -> Result<Option<UserProfile>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM profiles WHERE id = ?", PROFILE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(profile_from_row).transpose()
    }

    /// Get a profile that must exist.
    pub async fn require_profile(&self, id: &str) -> Result<UserProfile, AppError> {
        self.get_profile(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Profile {} not found", id)))
    }

    /// Whether the user is banned. Unregistered users are not.
    pub async fn is_banned(&self, id: &str) -> Result<bool, AppError> {
        Ok(self
            .get_profile(id)
            .await?
            .map(|p| p.is_banned)
            .unwrap_or(false))
    }

    /// Register a profile for `id`.
    pub async fn create_profile(
        &self,
        id: &str,
        request: &RegisterProfileRequest,
        is_admin: bool,
    ) -> Result<UserProfile, AppError> {
        if let Some(existing) = self.get_profile(id).await? {
            return Err(AppError::Conflict {
                message: format!("Profile {} already exists", id),
                current_version: existing.version,
            });
        }

        let now = now();
        let nickname = request
            .nickname
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| request.display_name.clone());

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO profiles (id, display_name, nickname, faculty, student_id, bio, profile_image_url, is_banned, is_admin, created_at, updated_at, version) VALUES (?, ?, ?, ?, ?, NULL, NULL, 0, ?, ?, ?, 1)"
        )
        .bind(id)
        .bind(&request.display_name)
        .bind(&nickname)
        .bind(&request.faculty)
        .bind(&request.student_id)
        .bind(is_admin as i32)
        .bind(format_time(&now))
        .bind(format_time(&now))
        .execute(&mut *tx)
        .await?;
        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        self.announce([ChangeEvent::new(revision, Collection::Profiles, id)]);

        Ok(UserProfile {
            id: id.to_string(),
            display_name: request.display_name.clone(),
            nickname,
            faculty: request.faculty.clone(),
            student_id: request.student_id.clone(),
            bio: None,
            profile_image_url: None,
            is_banned: false,
            is_admin,
            created_at: now,
            updated_at: now,
            version: 1,
        })
    }

    /// Update a profile with optimistic concurrency control. Absent fields keep their value.
    pub async fn update_profile(
        &self,
        id: &str,
        request: &UpdateProfileRequest,
    ) -> Result<UserProfile, AppError> {
        let existing = self.require_profile(id).await?;

        // Check version for optimistic concurrency
        if let Some(expected) = request.expected_version {
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

        let now = now();
        let new_version = existing.version + 1;

        let nickname = request
            .nickname
            .clone()
            .unwrap_or_else(|| existing.nickname.clone());
        let bio = request.bio.clone().or(existing.bio.clone());
        let profile_image_url = request
            .profile_image_url
            .clone()
            .or(existing.profile_image_url.clone());

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE profiles SET nickname = ?, bio = ?, profile_image_url = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?"
        )
        .bind(&nickname)
        .bind(&bio)
        .bind(&profile_image_url)
        .bind(format_time(&now))
        .bind(new_version)
        .bind(id)
        .bind(existing.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            // Race condition - version changed between read and write
            let current = self.get_profile(id).await?;
            return Err(AppError::Conflict {
                message: "Concurrent modification detected".to_string(),
                current_version: current.map(|p| p.version).unwrap_or(0),
            });
        }

        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        self.announce([ChangeEvent::new(revision, Collection::Profiles, id)]);

        Ok(UserProfile {
            nickname,
            bio,
            profile_image_url,
            updated_at: now,
            version: new_version,
            ..existing
        })
    }
}

pub(super) fn profile_from_row(row: &SqliteRow) -> Result<UserProfile, AppError> {
    let r = RowReader::new(row, "profiles");
    Ok(UserProfile {
        id: r.get("id")?,
        display_name: r.get("display_name")?,
        nickname: r.get("nickname")?,
        faculty: r.get("faculty")?,
        student_id: r.get("student_id")?,
        bio: r.get("bio")?,
        profile_image_url: r.get("profile_image_url")?,
        is_banned: r.flag("is_banned")?,
        is_admin: r.flag("is_admin")?,
        created_at: r.time("created_at")?,
        updated_at: r.time("updated_at")?,
        version: r.get("version")?,
    })
}
