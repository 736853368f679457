//! Shoplist Core Library
//!
//! This crate provides the realtime sync layer for shoplist, a shared
//! shopping-list app: several people open the same list on their own
//! devices and see each other's items and comments appear within moments.
//!
//! # Architecture
//!
//! - **Backend**: a hosted store (PostgREST over HTTP plus a realtime change
//!   feed) is the single source of truth. `MemoryStore` stands in for it in
//!   tests and offline use.
//! - **Synchronizers**: `ListSync` and `CommentSync` keep an ordered local
//!   replica in step with the store by merging an initial fetch with the
//!   change feed.
//!
//! # Quick Start
//!
//! ```text
//! let store = Arc::new(SupabaseStore::from_config(&Config::load()?)?);
//! let list = create_list(store.as_ref(), "Groceries").await?;
//!
//! let sync = ListSync::new(store.clone());
//! sync.load(list.id).await?;
//! sync.add_item("Milk").await?;
//!
//! let mut updates = sync.subscribe();
//! while updates.changed().await.is_ok() {
//!     render(&updates.borrow_and_update());
//! }
//! ```
//!
//! # Modules
//!
//! - `sync`: Change-feed client and synchronizers (main entry point)
//! - `store`: Backend contract and its implementations
//! - `models`: Rows of lists, items, and comments
//! - `lists`: List creation and share links
//! - `config`: Application configuration

pub mod config;
pub mod error;
pub mod lists;
pub mod models;
pub mod store;
pub mod sync;

pub use config::Config;
pub use error::{StoreError, SyncError, SyncResult};
pub use lists::{create_list, fetch_list, parse_list_id, ShareLink};
pub use models::{Comment, Item, ShoppingList};
pub use store::{Backend, MemoryStore, SupabaseStore};
pub use sync::{CommentSync, FeedDiagnostics, ListSnapshot, ListSync, LoadState};
