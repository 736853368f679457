//! Comment command handlers

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use shoplist_core::{CommentSync, LoadState, SupabaseStore};

use super::open_list;
use crate::output::Output;

async fn open_thread(
    store: &Arc<SupabaseStore>,
    list: &str,
) -> Result<CommentSync<SupabaseStore>> {
    // Comments don't check the list themselves
    let list_sync = open_list(store, list).await?;
    let list_id = match list_sync.list() {
        Some(l) => l.id,
        None => bail!("List not found: {}", list),
    };
    list_sync.close();

    let thread = CommentSync::new(Arc::clone(store));
    match thread.load(list_id).await.context("Failed to load comments")? {
        LoadState::Ready => Ok(thread),
        other => bail!("Comments for {} could not be loaded ({})", list_id, other),
    }
}

/// Post a comment on a list
pub async fn add(
    store: &Arc<SupabaseStore>,
    list: String,
    text: String,
    output: &Output,
) -> Result<()> {
    let thread = open_thread(store, &list).await?;
    let comment = thread
        .add_comment(&text)
        .await
        .context("Failed to post comment")?;
    thread.close();

    output.success("Comment posted");
    output.print_comment(&comment);
    Ok(())
}

/// Delete a comment by id or id prefix
pub async fn delete(
    store: &Arc<SupabaseStore>,
    list: String,
    id: String,
    output: &Output,
) -> Result<()> {
    let thread = open_thread(store, &list).await?;
    let prefix = id.trim().to_lowercase();
    let matches: Vec<Uuid> = thread
        .comments()
        .iter()
        .map(|c| c.id)
        .filter(|cid| cid.to_string().starts_with(&prefix))
        .collect();
    let comment_id = match matches.as_slice() {
        [one] => *one,
        [] => bail!("Comment not found: {}", id),
        _ => bail!("Ambiguous comment id prefix: {}", id),
    };

    match thread.delete_comment(comment_id).await {
        Ok(()) => output.success("Comment deleted"),
        Err(e) if e.is_not_found() => output.message("Comment was already deleted"),
        Err(e) => return Err(e).context("Failed to delete comment"),
    }
    thread.close();
    Ok(())
}
