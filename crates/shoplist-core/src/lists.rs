//! Creating lists and sharing them

use std::fmt;

use tracing::info;
use uuid::Uuid;

use crate::error::{validate_text, StoreError, SyncError, SyncResult};
use crate::models::{Collection, NewList, ShoppingList};
use crate::store::{Backend, Filter};

/// Create a new, empty list
pub async fn create_list<B: Backend + ?Sized>(backend: &B, name: &str) -> SyncResult<ShoppingList> {
    let name = validate_text(name, "list name")?;
    let row = serde_json::to_value(NewList { name }).map_err(StoreError::from)?;
    let row = backend.insert(Collection::Lists, row).await?;
    let list: ShoppingList = serde_json::from_value(row).map_err(StoreError::from)?;
    info!("Created list {} ({})", list.id, list.name);
    Ok(list)
}

/// Fetch a list once, without following changes
pub async fn fetch_list<B: Backend + ?Sized>(backend: &B, list_id: Uuid) -> SyncResult<ShoppingList> {
    let row = backend
        .fetch_one(Collection::Lists, &Filter::id(list_id))
        .await?
        .ok_or(SyncError::NotFound {
            what: "list",
            id: list_id,
        })?;
    Ok(serde_json::from_value(row).map_err(StoreError::from)?)
}

/// Accept either a bare list id or a share URL ending in one
pub fn parse_list_id(input: &str) -> SyncResult<Uuid> {
    let trimmed = input.trim().trim_end_matches('/');
    let candidate = trimmed
        .split(['?', '#'])
        .next()
        .unwrap_or(trimmed)
        .rsplit('/')
        .next()
        .unwrap_or(trimmed);
    candidate
        .parse()
        .map_err(|_| SyncError::Validation(format!("not a list id or share link: {:?}", input)))
}

/// A link other people can open to join a list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLink {
    pub list_id: Uuid,
    pub url: String,
}

impl ShareLink {
    pub fn for_list(base_url: &str, list_id: Uuid) -> Self {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), list_id);
        Self { list_id, url }
    }
}

impl fmt::Display for ShareLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
