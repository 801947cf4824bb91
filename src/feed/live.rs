//! Live views over the store: an immutable snapshot on attach and after every relevant change.

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::Event;
use futures::stream::{self, Stream};
use serde::Serialize;

use super::{ChangeEvent, Collection, Subscription};
use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{Message, Task};

/// Every task, newest first, as of `revision_id`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub revision_id: i64,
    pub tasks: Vec<Task>,
}

/// Every message of one chat, oldest first, as of `revision_id`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSnapshot {
    pub revision_id: i64,
    pub chat_id: String,
    pub messages: Vec<Message>,
}

/// A whole-list view pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Snapshot {
    Tasks(TaskSnapshot),
    Messages(MessageSnapshot),
}

impl Snapshot {
    pub fn event_name(&self) -> &'static str {
        match self {
            Snapshot::Tasks(_) => "tasks",
            Snapshot::Messages(_) => "messages",
        }
    }

    pub fn revision_id(&self) -> i64 {
        match self {
            Snapshot::Tasks(s) => s.revision_id,
            Snapshot::Messages(s) => s.revision_id,
        }
    }
}

#[derive(Debug, Clone)]
enum View {
    Tasks,
    Messages { chat_id: String },
}

impl View {
    fn wants(&self, event: &ChangeEvent) -> bool {
        match self {
            View::Tasks => event.collection == Collection::Tasks,
            View::Messages { chat_id } => {
                event.collection == Collection::Messages
                    && event.parent_id.as_deref() == Some(chat_id.as_str())
            }
        }
    }

    async fn load(&self, repo: &Repository) -> Result<Snapshot, AppError> {
        let revision_id = repo.get_revision_id().await?;
        match self {
            View::Tasks => Ok(Snapshot::Tasks(TaskSnapshot {
                revision_id,
                tasks: repo.list_tasks().await?,
            })),
            View::Messages { chat_id } => Ok(Snapshot::Messages(MessageSnapshot {
                revision_id,
                chat_id: chat_id.clone(),
                messages: repo.list_messages(chat_id).await?,
            })),
        }
    }
}

/// Entry point for live views.
#[derive(Clone)]
pub struct LiveStore {
    repo: Arc<Repository>,
}

impl LiveStore {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    pub fn subscribe_tasks(&self) -> LiveSubscription {
        self.attach(View::Tasks)
    }

    pub fn subscribe_messages(&self, chat_id: &str) -> LiveSubscription {
        self.attach(View::Messages {
            chat_id: chat_id.to_string(),
        })
    }

    fn attach(&self, view: View) -> LiveSubscription {
        LiveSubscription {
            repo: Arc::clone(&self.repo),
            changes: self.repo.feed().subscribe(),
            view,
            primed: false,
        }
    }
}

/// A subscription yielding a fresh [`Snapshot`] per relevant change.
pub struct LiveSubscription {
    repo: Arc<Repository>,
    changes: Subscription,
    view: View,
    primed: bool,
}

impl LiveSubscription {
    /// The first call yields the current state; later calls wait for the next relevant write.
    /// Returns `None` once the feed is gone.
    pub async fn next(&mut self) -> Option<Result<Arc<Snapshot>, AppError>> {
        if self.primed {
            let view = &self.view;
            self.changes.next_matching(|e| view.wants(e)).await?;
        }
        self.primed = true;
        Some(self.view.load(&self.repo).await.map(Arc::new))
    }

    pub fn unsubscribe(self) {
        self.changes.unsubscribe();
    }

    /// Adapt into a server-sent-events stream.
    pub fn into_sse(self) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
        stream::unfold(self, |mut sub| async move {
            let event = match sub.next().await? {
                Ok(snapshot) => Event::default()
                    .event(snapshot.event_name())
                    .id(snapshot.revision_id().to_string())
                    .json_data(snapshot.as_ref())
                    .unwrap_or_else(|e| {
                        tracing::warn!("Failed to encode snapshot: {}", e);
                        Event::default().event("error").data("snapshot encoding failed")
                    }),
                Err(e) => {
                    tracing::warn!("Failed to load snapshot: {}", e);
                    Event::default().event("error").data(e.message())
                }
            };
            Some((Ok(event), sub))
        })
    }
}
