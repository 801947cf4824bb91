//! Two-party chat threads and their messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary text stored for a message that carries only an image.
pub const IMAGE_SUMMARY: &str = "[image]";

/// A conversation between two users, with a denormalized summary of its newest message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub participant_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sender_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participant_ids.iter().any(|id| id == user_id)
    }

    /// The participant that is not `user_id`.
    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        self.participant_ids
            .iter()
            .find(|id| id.as_str() != user_id)
            .map(String::as_str)
    }

    /// Timestamp used to order a user's chat list.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }
}

/// A message inside a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Text shown as the chat's last message.
    pub fn summary(&self) -> String {
        summarize(&self.text, self.image_url.as_deref())
    }
}

/// Chat-list text for a message with `text` and an optional image.
pub fn summarize(text: &str, image_url: Option<&str>) -> String {
    if text.trim().is_empty() && image_url.is_some() {
        IMAGE_SUMMARY.to_string()
    } else {
        text.to_string()
    }
}

/// One row of a user's chat list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPreview {
    pub id: String,
    pub other_user_id: String,
    pub other_user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_user_profile_image_url: Option<String>,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
}

/// Request body for opening (or finding) a chat with another user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenChatRequest {
    pub other_user_id: String,
}

/// Request body for sending a message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image_url: Option<String>,
}
