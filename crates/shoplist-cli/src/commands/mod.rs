//! Command handlers

pub mod comment;
pub mod config;
pub mod item;
pub mod list;
pub mod watch;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use shoplist_core::{parse_list_id, Config, Item, ListSync, LoadState, SupabaseStore};

/// Connect to the configured store
pub fn connect(config: &Config) -> Result<Arc<SupabaseStore>> {
    if !config.has_store() {
        bail!(
            "No store configured. Set one with:\n  \
             shoplist config set store_url https://<project>.supabase.co\n  \
             shoplist config set api_key <anon key>"
        );
    }
    let store = SupabaseStore::from_config(config).context("Failed to connect to store")?;
    Ok(Arc::new(store))
}

/// Load a list given its id or share link, failing if it does not exist
pub async fn open_list(store: &Arc<SupabaseStore>, list: &str) -> Result<ListSync<SupabaseStore>> {
    let list_id = parse_list_id(list)?;
    let sync = ListSync::new(Arc::clone(store));
    match sync.load(list_id).await.context("Failed to load list")? {
        LoadState::Ready => Ok(sync),
        LoadState::NotFound => bail!("List not found: {}", list_id),
        other => bail!("List {} could not be loaded ({})", list_id, other),
    }
}

/// Find an item by full id, id prefix, or exact text
pub fn resolve_item(items: &[Item], query: &str) -> Result<Item> {
    let query = query.trim();
    if let Ok(id) = query.parse::<Uuid>() {
        if let Some(item) = items.iter().find(|i| i.id == id) {
            return Ok(item.clone());
        }
        bail!("Item not found: {}", query);
    }

    let by_prefix: Vec<&Item> = items
        .iter()
        .filter(|i| i.id.to_string().starts_with(&query.to_lowercase()))
        .collect();
    match by_prefix.as_slice() {
        [item] => return Ok((*item).clone()),
        [] => {}
        _ => bail!("Ambiguous item id prefix: {}", query),
    }

    let by_text: Vec<&Item> = items
        .iter()
        .filter(|i| i.text.eq_ignore_ascii_case(query))
        .collect();
    match by_text.as_slice() {
        [item] => Ok((*item).clone()),
        [] => bail!("Item not found: {}", query),
        _ => bail!("Several items are called {:?}; use the id instead", query),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(id: u128, text: &str) -> Item {
        Item {
            id: Uuid::from_u128(id),
            list_id: Uuid::nil(),
            text: text.to_string(),
            completed: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_resolve_item_by_id_prefix_and_text() {
        let milk = item(0xaaaa_0000_0000_0000_0000_0000_0000_0001, "Milk");
        let eggs = item(0xbbbb_0000_0000_0000_0000_0000_0000_0002, "Eggs");
        let items = vec![milk.clone(), eggs.clone()];

        assert_eq!(resolve_item(&items, &milk.id.to_string()).unwrap(), milk);
        assert_eq!(resolve_item(&items, "bbbb").unwrap(), eggs);
        assert_eq!(resolve_item(&items, "milk").unwrap(), milk);
        assert!(resolve_item(&items, "bread").is_err());
    }

    #[test]
    fn test_resolve_item_ambiguous() {
        let items = vec![
            item(0xaaaa_0000_0000_0000_0000_0000_0000_0001, "Milk"),
            item(0xaaaa_1000_0000_0000_0000_0000_0000_0002, "Milk"),
        ];
        assert!(resolve_item(&items, "aaaa").is_err());
        assert!(resolve_item(&items, "Milk").is_err());
    }
}
