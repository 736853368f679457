//! Realtime synchronization
//!
//! Synchronizers keep a local, ordered copy of rows in step with the store:
//! an initial bulk fetch merged with the collection's change feed. Local
//! state is only ever changed by merging feed events or acknowledged
//! writes, so it converges on the store regardless of arrival order.

mod collection;
mod comments;
mod feed;
mod list;
mod replica;

use std::fmt;

pub use collection::OrderedCollection;
pub use comments::{CommentSnapshot, CommentSync};
pub use feed::{parse_change, FeedDiagnostics, FeedEvent, FeedHandle, FeedSpec, Subscription};
pub use list::{ListSnapshot, ListSync};

/// Lifecycle of a synchronizer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    /// Initial fetch in progress
    #[default]
    Loading,
    /// Fetched and following changes
    Ready,
    /// The requested list does not exist
    NotFound,
    /// The initial fetch failed
    Failed(String),
}

impl LoadState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => write!(f, "loading"),
            Self::Ready => write!(f, "ready"),
            Self::NotFound => write!(f, "not found"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}
