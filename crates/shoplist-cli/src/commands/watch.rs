//! Live view of a list

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{debug, info};

use shoplist_core::store::ConnectionStatus;
use shoplist_core::sync::{CommentSnapshot, ListSnapshot};
use shoplist_core::{CommentSync, LoadState, SupabaseStore};

use super::open_list;
use crate::output::{Output, OutputFormat};

/// Follow a list, re-rendering on every change until interrupted
pub async fn watch(store: &Arc<SupabaseStore>, list: String, output: &Output) -> Result<()> {
    let list_sync = open_list(store, &list).await?;
    let Some(list_id) = list_sync.list().map(|l| l.id) else {
        bail!("List not found: {}", list);
    };
    let thread = CommentSync::new(Arc::clone(store));
    if let Err(e) = thread.load(list_id).await {
        // The list is still worth showing without its comments
        info!("Comments unavailable: {}", e);
    }

    let mut items_rx = list_sync.subscribe();
    let mut comments_rx = thread.subscribe();
    let mut status_rx = store.connection_status();

    render(output, &items_rx.borrow_and_update(), &comments_rx.borrow_and_update());
    output.message("Watching for changes. Press Ctrl-C to stop.");

    loop {
        tokio::select! {
            changed = items_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = comments_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *status_rx.borrow_and_update();
                debug!("Connection status: {:?}", status);
                if status == ConnectionStatus::Disconnected {
                    output.message("Connection lost; reconnecting...");
                }
                continue;
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }

        let snapshot = items_rx.borrow_and_update().clone();
        if snapshot.state != LoadState::Ready {
            break;
        }
        render(output, &snapshot, &comments_rx.borrow_and_update());
    }

    list_sync.close();
    thread.close();
    Ok(())
}

fn render(output: &Output, list: &ListSnapshot, comments: &CommentSnapshot) {
    let Some(ref shopping_list) = list.list else {
        return;
    };
    // JSON mode prints one document per line so the stream can be piped
    if output.format == OutputFormat::Human {
        println!();
    }
    output.print_list(
        shopping_list,
        list.items.as_slice(),
        comments.comments.as_slice(),
    );
}
