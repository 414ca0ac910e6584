//! In-memory primary store for comments (process lifetime only).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Entity name comments are audited under.
pub const COMMENTS_ENTITY: &str = "Comments";

/// Request body for create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentInput {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Comments")]
    pub comments: String,
    #[serde(rename = "TimeStamp")]
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Comments")]
    pub comments: String,
    #[serde(rename = "TimeStamp")]
    pub timestamp: NaiveDateTime,
}

impl Comment {
    fn from_input(id: i64, input: CommentInput) -> Self {
        Self {
            id,
            name: input.name,
            comments: input.comments,
            timestamp: input.timestamp,
        }
    }
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    rows: BTreeMap<i64, Comment>,
}

/// Sequential ids from 1; ids are never reused after delete.
#[derive(Default)]
pub struct InMemoryCommentStore {
    inner: RwLock<Inner>,
}

impl InMemoryCommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store whose next id is `last_id + 1`.
    pub fn starting_after(last_id: i64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: last_id.max(0),
                rows: BTreeMap::new(),
            }),
        }
    }

    pub async fn create(&self, input: CommentInput) -> Comment {
        let mut g = self.inner.write().await;
        g.next_id += 1;
        let comment = Comment::from_input(g.next_id, input);
        g.rows.insert(comment.id, comment.clone());
        comment
    }

    pub async fn list(&self) -> Vec<Comment> {
        self.inner.read().await.rows.values().cloned().collect()
    }

    pub async fn get(&self, id: i64) -> Option<Comment> {
        self.inner.read().await.rows.get(&id).cloned()
    }

    /// Replaces the comment; `None` if it does not exist.
    pub async fn update(&self, id: i64, input: CommentInput) -> Option<Comment> {
        let mut g = self.inner.write().await;
        let slot = g.rows.get_mut(&id)?;
        *slot = Comment::from_input(id, input);
        Some(slot.clone())
    }

    /// Removes the comment and returns its last state.
    pub async fn delete(&self, id: i64) -> Option<Comment> {
        self.inner.write().await.rows.remove(&id)
    }
}
