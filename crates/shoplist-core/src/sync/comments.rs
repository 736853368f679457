//! Comment thread synchronizer
//!
//! Same shape as the list synchronizer, for a list's comments: newest
//! first, and only insert and delete changes are followed since comments
//! are never edited.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use super::collection::OrderedCollection;
use super::feed::{FeedDiagnostics, FeedSpec};
use super::replica::{fetch_rows, Replica, View};
use super::LoadState;
use crate::error::{validate_text, StoreError, SyncError, SyncResult};
use crate::models::{Collection, Comment, NewComment};
use crate::store::{Backend, ChangeKind, Filter};

/// Published state of a [`CommentSync`]
#[derive(Debug, Clone, Default)]
pub struct CommentSnapshot {
    pub state: LoadState,
    pub list_id: Option<Uuid>,
    /// Comments, newest first
    pub comments: OrderedCollection<Comment>,
}

impl View for CommentSnapshot {
    type Row = Comment;

    fn rows_mut(&mut self) -> &mut OrderedCollection<Comment> {
        &mut self.comments
    }
}

/// Synchronizer for one list's comment thread
pub struct CommentSync<B: Backend + ?Sized> {
    replica: Replica<B, CommentSnapshot>,
}

impl<B: Backend + ?Sized> CommentSync<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            replica: Replica::new(backend, CommentSnapshot::default()),
        }
    }

    /// Load a list's comments and start following new and removed ones
    ///
    /// The list itself is not checked; a thread for an unknown list is
    /// simply empty.
    pub async fn load(&self, list_id: Uuid) -> SyncResult<LoadState> {
        let filter = Filter::list(list_id);
        let spec = FeedSpec {
            filter: filter.clone(),
            kinds: vec![ChangeKind::Insert, ChangeKind::Delete],
        };
        let (generation, subscription) = self.replica.begin(spec).await;
        self.replica.publish(generation, |view| {
            *view = CommentSnapshot {
                list_id: Some(list_id),
                ..CommentSnapshot::default()
            };
            true
        });

        match fetch_rows::<B, Comment>(self.replica.backend(), &filter).await {
            Ok(comments) => {
                info!("Loaded {} comment(s) for list {}", comments.len(), list_id);
                self.replica.publish(generation, |view| {
                    view.state = LoadState::Ready;
                    view.comments = OrderedCollection::from_rows(comments);
                    true
                });
                self.replica.start_pump(generation, subscription, filter);
                Ok(LoadState::Ready)
            }
            Err(e) => {
                warn!("Error fetching comments for list {}: {}", list_id, e);
                let reason = e.to_string();
                self.replica.publish(generation, |view| {
                    view.state = LoadState::Failed(reason);
                    true
                });
                self.replica.end(generation);
                Err(e)
            }
        }
    }

    pub fn state(&self) -> LoadState {
        self.replica.view().state
    }

    /// Comments, newest first
    pub fn comments(&self) -> Vec<Comment> {
        self.replica.view().comments.to_vec()
    }

    pub fn snapshot(&self) -> CommentSnapshot {
        self.replica.view()
    }

    pub fn subscribe(&self) -> watch::Receiver<CommentSnapshot> {
        self.replica.subscribe()
    }

    pub fn diagnostics(&self) -> Arc<FeedDiagnostics> {
        self.replica.diagnostics()
    }

    /// Post a comment to the thread
    ///
    /// As with items, the acknowledged row never overrides what the feed
    /// has already delivered or removed.
    pub async fn add_comment(&self, content: &str) -> SyncResult<Comment> {
        let content = validate_text(content, "comment")?;
        let (generation, list_id) = self.ready()?;

        let row = serde_json::to_value(NewComment { list_id, content })
            .map_err(StoreError::from)?;
        let row = self
            .replica
            .backend()
            .insert(Collection::Comments, row)
            .await
            .inspect_err(|e| warn!("Error adding comment: {}", e))?;
        let comment: Comment = serde_json::from_value(row).map_err(StoreError::from)?;

        self.replica
            .publish(generation, |view| view.comments.merge_ack(comment.clone()));
        Ok(comment)
    }

    /// Remove a comment; `NotFound` if it was already gone
    pub async fn delete_comment(&self, comment_id: Uuid) -> SyncResult<()> {
        let (generation, _) = self.ready()?;

        let deleted = self
            .replica
            .backend()
            .delete(Collection::Comments, comment_id)
            .await
            .inspect_err(|e| warn!("Error deleting comment: {}", e))?;

        self.replica
            .publish(generation, |view| view.comments.remove(comment_id).is_some());

        if deleted {
            Ok(())
        } else {
            Err(SyncError::NotFound {
                what: "comment",
                id: comment_id,
            })
        }
    }

    pub fn close(&self) {
        self.replica.close();
    }

    fn ready(&self) -> SyncResult<(u64, Uuid)> {
        let view = self.replica.view();
        let list_id = match (&view.state, view.list_id) {
            (LoadState::Ready, Some(list_id)) => list_id,
            _ => {
                return Err(SyncError::Validation(format!(
                    "comment thread is not ready ({})",
                    view.state
                )))
            }
        };
        let generation = self.replica.live_generation().ok_or(SyncError::Closed)?;
        Ok((generation, list_id))
    }
}
