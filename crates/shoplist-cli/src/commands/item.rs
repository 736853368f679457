//! Item command handlers

use std::sync::Arc;

use anyhow::{Context, Result};

use shoplist_core::SupabaseStore;

use super::{open_list, resolve_item};
use crate::output::Output;

/// Add an item to a list
pub async fn add(
    store: &Arc<SupabaseStore>,
    list: String,
    text: String,
    output: &Output,
) -> Result<()> {
    let sync = open_list(store, &list).await?;
    let item = sync.add_item(&text).await.context("Failed to add item")?;
    sync.close();

    output.success(&format!("Added: {}", item.text));
    output.print_item(&item);
    Ok(())
}

/// Check or uncheck an item
pub async fn toggle(
    store: &Arc<SupabaseStore>,
    list: String,
    item: String,
    output: &Output,
) -> Result<()> {
    let sync = open_list(store, &list).await?;
    let target = resolve_item(&sync.items(), &item)?;
    let updated = sync
        .toggle_item(&target)
        .await
        .context("Failed to update item")?;
    sync.close();

    let state = if updated.completed { "Checked" } else { "Unchecked" };
    output.success(&format!("{}: {}", state, updated.text));
    output.print_item(&updated);
    Ok(())
}

/// Remove an item from a list
pub async fn delete(
    store: &Arc<SupabaseStore>,
    list: String,
    item: String,
    output: &Output,
) -> Result<()> {
    let sync = open_list(store, &list).await?;
    let target = resolve_item(&sync.items(), &item)?;

    match sync.delete_item(target.id).await {
        Ok(()) => output.success(&format!("Removed: {}", target.text)),
        // Someone else got there first
        Err(e) if e.is_not_found() => output.message(&format!("Already removed: {}", target.text)),
        Err(e) => return Err(e).context("Failed to remove item"),
    }
    sync.close();
    Ok(())
}
