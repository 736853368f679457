//! List command handlers

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use shoplist_core::{
    create_list, fetch_list, parse_list_id, CommentSync, Config, ShareLink, SupabaseStore,
    SyncError,
};

use super::open_list;
use crate::output::Output;

/// Create a new list and print its share link
pub async fn create(
    store: &Arc<SupabaseStore>,
    config: &Config,
    name: String,
    output: &Output,
) -> Result<()> {
    let list = create_list(store.as_ref(), &name)
        .await
        .context("Failed to create list")?;
    let link = ShareLink::for_list(&config.share_base_url, list.id);
    output.print_created_list(&list, &link);
    Ok(())
}

/// Show a list with its items and comments
pub async fn show(store: &Arc<SupabaseStore>, list: String, output: &Output) -> Result<()> {
    let sync = open_list(store, &list).await?;
    let comments = CommentSync::new(Arc::clone(store));
    comments
        .load(parse_list_id(&list)?)
        .await
        .context("Failed to load comments")?;

    let snapshot = sync.snapshot();
    let Some(ref shopping_list) = snapshot.list else {
        bail!("List not found: {}", list);
    };
    output.print_list(
        shopping_list,
        snapshot.items.as_slice(),
        &comments.comments(),
    );

    sync.close();
    comments.close();
    Ok(())
}

/// Print the link other people can use to open a list
pub async fn share(
    store: &Arc<SupabaseStore>,
    config: &Config,
    list: String,
    output: &Output,
) -> Result<()> {
    let list_id = parse_list_id(&list)?;
    let shopping_list = match fetch_list(store.as_ref(), list_id).await {
        Ok(l) => l,
        Err(SyncError::NotFound { .. }) => bail!("List not found: {}", list_id),
        Err(e) => return Err(e).context("Failed to fetch list"),
    };
    let link = ShareLink::for_list(&config.share_base_url, shopping_list.id);
    output.print_share_link(&shopping_list, &link);
    Ok(())
}
