//! Chat and message operations.
//!
//! A chat row stores its two participants in sorted order, so the pair has a single row whichever
//! side opens it. The summary columns mirror the newest message and are written in the same
//! transaction as the message itself.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::decode::{decode_all, format_time, now, RowReader};
use super::repository::bump_revision;
use super::Repository;
use crate::errors::AppError;
use crate::feed::{ChangeEvent, Collection};
use crate::models::{summarize, Chat, ChatPreview, Message, SendMessageRequest};

const CHAT_COLUMNS: &str =
    "id, participant_a, participant_b, last_message, last_message_at, last_sender_id, created_at";

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, text, image_url, created_at";

fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Repository {
    /// Get a chat by ID.
    pub async fn get_chat(&self, id: &str) -> Result<Option<Chat>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM chats WHERE id = ?", CHAT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(chat_from_row).transpose()
    }

    /// Get a chat that must exist.
    pub async fn require_chat(&self, id: &str) -> Result<Chat, AppError> {
        self.get_chat(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Chat {} not found", id)))
    }

    /// Find the chat between two users, creating it when missing.
    ///
    /// Returns the chat and whether this call created it.
    pub async fn open_chat(&self, user_id: &str, other_user_id: &str) -> Result<(Chat, bool), AppError> {
        let (first, second) = ordered_pair(user_id, other_user_id);

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO chats (id, participant_a, participant_b, created_at) VALUES (?, ?, ?, ?) ON CONFLICT (participant_a, participant_b) DO NOTHING",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(first)
        .bind(second)
        .bind(format_time(&now()))
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        let row = sqlx::query(&format!(
            "SELECT {} FROM chats WHERE participant_a = ? AND participant_b = ?",
            CHAT_COLUMNS
        ))
        .bind(first)
        .bind(second)
        .fetch_one(&mut *tx)
        .await?;
        let chat = chat_from_row(&row)?;

        if inserted {
            let revision = bump_revision(&mut tx).await?;
            tx.commit().await?;
            tracing::info!(chat_id = %chat.id, "chat opened");
            self.announce([ChangeEvent::new(revision, Collection::Chats, &chat.id)]);
        } else {
            tx.commit().await?;
        }

        Ok((chat, inserted))
    }

    /// Chats the user takes part in, most recent activity first.
    pub async fn list_chats_for(&self, user_id: &str) -> Result<Vec<Chat>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chats WHERE participant_a = ? OR participant_b = ? ORDER BY COALESCE(last_message_at, created_at) DESC, id DESC",
            CHAT_COLUMNS
        ))
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_all(&rows, chat_from_row))
    }

    /// The user's chat list as shown in the inbox.
    pub async fn list_chat_previews(&self, user_id: &str) -> Result<Vec<ChatPreview>, AppError> {
        let chats = self.list_chats_for(user_id).await?;
        let mut previews = Vec::with_capacity(chats.len());

        for chat in chats {
            let other_user_id = chat.other_participant(user_id).unwrap_or(user_id).to_string();
            let profile = self.get_profile(&other_user_id).await?;
            let (other_user_name, other_user_profile_image_url) = match profile {
                Some(p) => (p.nickname, p.profile_image_url),
                None => (other_user_id.clone(), None),
            };

            previews.push(ChatPreview {
                last_message_at: chat.activity_at(),
                last_message: chat.last_message.unwrap_or_default(),
                id: chat.id,
                other_user_id,
                other_user_name,
                other_user_profile_image_url,
            });
        }

        Ok(previews)
    }

    /// Messages of a chat, oldest first.
    pub async fn list_messages(&self, chat_id: &str) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE chat_id = ? ORDER BY created_at, id",
            MESSAGE_COLUMNS
        ))
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_all(&rows, message_from_row))
    }

    /// Append a message and refresh the chat summary in one transaction.
    pub async fn send_message(
        &self,
        chat_id: &str,
        sender_id: &str,
        request: &SendMessageRequest,
    ) -> Result<Message, AppError> {
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            text: request.text.trim().to_string(),
            image_url: request.image_url.clone(),
            created_at: now(),
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO messages ({}) VALUES (?, ?, ?, ?, ?, ?)",
            MESSAGE_COLUMNS
        ))
        .bind(&message.id)
        .bind(&message.chat_id)
        .bind(&message.sender_id)
        .bind(&message.text)
        .bind(&message.image_url)
        .bind(format_time(&message.created_at))
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            "UPDATE chats SET last_message = ?, last_message_at = ?, last_sender_id = ? WHERE id = ?",
        )
        .bind(message.summary())
        .bind(format_time(&message.created_at))
        .bind(&message.sender_id)
        .bind(chat_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Chat {} not found", chat_id)));
        }

        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        self.announce([
            ChangeEvent::new(revision, Collection::Messages, &message.id).with_parent(chat_id),
            ChangeEvent::new(revision, Collection::Chats, chat_id),
        ]);

        Ok(message)
    }

    /// Recompute every chat summary from its newest message. Returns how many chats changed.
    pub async fn reconcile_chat_summaries(&self) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"SELECT c.id AS chat_id, c.last_message, c.last_message_at, c.last_sender_id,
                m.sender_id, m.text, m.image_url, m.created_at
            FROM chats c
            JOIN messages m ON m.id = (
                SELECT id FROM messages WHERE chat_id = c.id ORDER BY created_at DESC, id DESC LIMIT 1
            )"#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut repaired = Vec::new();
        for row in &rows {
            let chat_id: String = row.try_get("chat_id")?;
            let sender_id: String = row.try_get("sender_id")?;
            let text: String = row.try_get("text")?;
            let image_url: Option<String> = row.try_get("image_url")?;
            let created_at: String = row.try_get("created_at")?;
            let summary = summarize(&text, image_url.as_deref());

            let stored_message: Option<String> = row.try_get("last_message")?;
            let stored_at: Option<String> = row.try_get("last_message_at")?;
            let stored_sender: Option<String> = row.try_get("last_sender_id")?;
            if stored_message.as_deref() == Some(summary.as_str())
                && stored_at.as_deref() == Some(created_at.as_str())
                && stored_sender.as_deref() == Some(sender_id.as_str())
            {
                continue;
            }

            sqlx::query(
                "UPDATE chats SET last_message = ?, last_message_at = ?, last_sender_id = ? WHERE id = ?",
            )
            .bind(&summary)
            .bind(&created_at)
            .bind(&sender_id)
            .bind(&chat_id)
            .execute(&mut *tx)
            .await?;
            repaired.push(chat_id);
        }

        if repaired.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(repaired = repaired.len(), "reconciled chat summaries");
        let count = repaired.len() as u64;
        self.announce(
            repaired
                .into_iter()
                .map(|chat_id| ChangeEvent::new(revision, Collection::Chats, chat_id)),
        );

        Ok(count)
    }
}

fn chat_from_row(row: &SqliteRow) -> Result<Chat, AppError> {
    let r = RowReader::new(row, "chats");
    let participant_a: String = r.get("participant_a")?;
    let participant_b: String = r.get("participant_b")?;
    if participant_a.is_empty() || participant_b.is_empty() {
        return Err(AppError::Decode(format!(
            "Invalid chats participants for record {}",
            r.get::<String>("id")?
        )));
    }

    Ok(Chat {
        id: r.get("id")?,
        participant_ids: vec![participant_a, participant_b],
        last_message: r.get("last_message")?,
        last_message_at: r.optional_time("last_message_at")?,
        last_sender_id: r.get("last_sender_id")?,
        created_at: r.time("created_at")?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message, AppError> {
    let r = RowReader::new(row, "messages");
    Ok(Message {
        id: r.get("id")?,
        chat_id: r.get("chat_id")?,
        sender_id: r.get("sender_id")?,
        text: r.get("text")?,
        image_url: r.get("image_url")?,
        created_at: r.time("created_at")?,
    })
}
