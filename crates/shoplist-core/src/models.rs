//! Data models for shoplist
//!
//! Defines the rows the store owns: lists, items, and comments.
//! Identifiers and timestamps are assigned by the store on insert, so each
//! row type has a matching `New*` payload without them.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Collections (tables) exposed by the backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Lists,
    Items,
    Comments,
}

impl Collection {
    /// Table name as the store knows it
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Lists => "lists",
            Collection::Items => "items",
            Collection::Comments => "comments",
        }
    }
}

/// Sort direction of a synced collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest first
    Ascending,
    /// Newest first
    Descending,
}

/// A row type that can be kept in a synced collection
///
/// Ties a row to its collection, identifier, and sort key so the merge
/// logic can be shared between items and comments.
pub trait Record:
    Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Collection the row lives in
    const COLLECTION: Collection;

    /// Order the collection is presented in
    const ORDER: SortOrder;

    /// Server-assigned identifier
    fn id(&self) -> Uuid;

    /// Server-assigned creation time (the sort key)
    fn created_at(&self) -> DateTime<Utc>;

    /// Compare two rows by presentation order
    ///
    /// Ties on the timestamp fall back to the identifier so the order is total.
    fn order_cmp(&self, other: &Self) -> Ordering {
        let by_time = self
            .created_at()
            .cmp(&other.created_at())
            .then_with(|| self.id().cmp(&other.id()));
        match Self::ORDER {
            SortOrder::Ascending => by_time,
            SortOrder::Descending => by_time.reverse(),
        }
    }
}

/// A shared shopping list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShoppingList {
    /// Unique identifier, also the share token
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// When the list was created
    pub created_at: DateTime<Utc>,
}

/// An entry on a shopping list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: Uuid,
    /// Owning list
    pub list_id: Uuid,
    pub text: String,
    /// Checked off
    #[serde(default)]
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl Record for Item {
    const COLLECTION: Collection = Collection::Items;
    const ORDER: SortOrder = SortOrder::Ascending;

    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A comment in a list's thread
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: Uuid,
    pub list_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Record for Comment {
    const COLLECTION: Collection = Collection::Comments;
    const ORDER: SortOrder = SortOrder::Descending;

    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Insert payload for a list
#[derive(Debug, Clone, Serialize)]
pub struct NewList {
    pub name: String,
}

/// Insert payload for an item
#[derive(Debug, Clone, Serialize)]
pub struct NewItem {
    pub list_id: Uuid,
    pub text: String,
    pub completed: bool,
}

/// Insert payload for a comment
#[derive(Debug, Clone, Serialize)]
pub struct NewComment {
    pub list_id: Uuid,
    pub content: String,
}
