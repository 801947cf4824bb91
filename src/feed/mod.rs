//! Change feed for committed writes.
//!
//! Every committed write publishes one [`ChangeEvent`] per touched collection. Readers attach
//! with [`ChangeFeed::subscribe`] and detach by dropping (or calling
//! [`Subscription::unsubscribe`] on) the returned handle.

mod live;

pub use live::*;

use serde::Serialize;
use tokio::sync::broadcast;

/// Collections whose writes are announced on the feed.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Tasks,
    Comments,
    Chats,
    Messages,
    Profiles,
    Reports,
}

/// Announcement of one committed write.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub revision_id: i64,
    pub collection: Collection,
    pub document_id: String,
    /// Owning document for sub-collections (task of a comment, chat of a message)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl ChangeEvent {
    pub fn new(revision_id: i64, collection: Collection, document_id: impl Into<String>) -> Self {
        Self {
            revision_id,
            collection,
            document_id: document_id.into(),
            parent_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Broadcast hub for [`ChangeEvent`]s.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Announce a committed write. Having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        tracing::debug!(
            revision_id = event.revision_id,
            collection = ?event.collection,
            document_id = %event.document_id,
            "publishing change"
        );
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A live attachment to the feed.
pub struct Subscription {
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the feed is gone.
    ///
    /// A subscriber that fell behind skips the events it missed and continues with the oldest
    /// one still buffered.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "change feed subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next event accepted by `wanted`.
    pub async fn next_matching<F>(&mut self, wanted: F) -> Option<ChangeEvent>
    where
        F: Fn(&ChangeEvent) -> bool,
    {
        loop {
            let event = self.next().await?;
            if wanted(&event) {
                return Some(event);
            }
        }
    }

    /// Detach from the feed.
    pub fn unsubscribe(self) {}
}
