//! Backing store contract
//!
//! The synchronizers talk to the store only through [`Backend`]. Rows cross
//! this boundary as untyped JSON; typing happens in the synchronizers and
//! the change-feed client, which validate payloads before use.
//!
//! ## Backends
//!
//! - [`MemoryStore`]: in-process store with change notifications, for tests
//! - [`SupabaseStore`]: PostgREST requests plus a realtime websocket

mod memory;
mod realtime;
mod rest;
mod supabase;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::Collection;

pub use memory::{MemoryStore, StoreCalls};
pub use realtime::{ConnectionStatus, RealtimeConfig};
pub use supabase::SupabaseStore;

/// Equality filter on a single column (`column = value`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: &'static str,
    pub value: String,
}

impl Filter {
    pub fn eq(column: &'static str, value: impl ToString) -> Self {
        Self {
            column,
            value: value.to_string(),
        }
    }

    /// Filter on the primary key
    pub fn id(id: Uuid) -> Self {
        Self::eq("id", id)
    }

    /// Filter on the owning list
    pub fn list(list_id: Uuid) -> Self {
        Self::eq("list_id", list_id)
    }

    /// Check a JSON row against this filter
    pub fn matches(&self, row: &Value) -> bool {
        match row.get(self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// Ordering for bulk fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: &'static str,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(column: &'static str) -> Self {
        Self {
            column,
            ascending: true,
        }
    }

    pub fn desc(column: &'static str) -> Self {
        Self {
            column,
            ascending: false,
        }
    }
}

/// Kind of row change carried by the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete];

    /// Wire name used by the realtime protocol
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

/// A row change exactly as the store reported it
///
/// `record` is the new row (inserts and updates). `old_record` is the prior
/// row for deletes, and may carry nothing but the primary key.
#[derive(Debug, Clone)]
pub struct RawChange {
    pub kind: ChangeKind,
    pub record: Option<Value>,
    pub old_record: Option<Value>,
}

/// Messages delivered on a raw subscription
#[derive(Debug, Clone)]
pub enum FeedMessage {
    /// A committed row change
    Change(RawChange),
    /// The transport reconnected and the subscription is live again.
    /// Changes committed while disconnected were not delivered.
    Resubscribed,
}

/// Identifies one live subscription at the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A registered subscription and the channel its messages arrive on
#[derive(Debug)]
pub struct RawSubscription {
    pub id: SubscriptionId,
    pub messages: mpsc::UnboundedReceiver<FeedMessage>,
}

/// Operations the synchronizers need from a backing store
///
/// One instance is shared (behind an `Arc`) by every synchronizer in the
/// process.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Fetch the single row matching `filter`, if any
    async fn fetch_one(&self, collection: Collection, filter: &Filter)
        -> StoreResult<Option<Value>>;

    /// Fetch all rows matching `filter` in the given order
    async fn fetch_many(
        &self,
        collection: Collection,
        filter: &Filter,
        order: OrderBy,
    ) -> StoreResult<Vec<Value>>;

    /// Insert a row; returns it with server-assigned `id` and `created_at`
    async fn insert(&self, collection: Collection, row: Value) -> StoreResult<Value>;

    /// Apply `patch` to the row with `id`; `None` when no row matched
    async fn update(&self, collection: Collection, id: Uuid, patch: Value)
        -> StoreResult<Option<Value>>;

    /// Delete the row with `id`; `false` when no row matched
    async fn delete(&self, collection: Collection, id: Uuid) -> StoreResult<bool>;

    /// Register for change notifications on rows matching `filter`
    ///
    /// Returns as soon as the subscription is registered; the transport may
    /// still be connecting.
    async fn subscribe(
        &self,
        collection: Collection,
        filter: &Filter,
        kinds: &[ChangeKind],
    ) -> StoreResult<RawSubscription>;

    /// Release a subscription. Unknown or already released ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}
