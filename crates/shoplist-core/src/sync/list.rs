//! List synchronizer
//!
//! Keeps one list's metadata and items in memory, merged from an initial
//! bulk fetch and the list's change feed, and writes user actions through
//! to the store.
//!
//! Lifecycle: `Loading` → `Ready` (while subscribed), or `Loading` →
//! `NotFound` when no list has the identifier. A transport error during the
//! initial fetch ends in `Failed`.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::collection::OrderedCollection;
use super::feed::{FeedDiagnostics, FeedSpec};
use super::replica::{fetch_rows, Replica, View};
use super::LoadState;
use crate::error::{validate_text, StoreError, SyncError, SyncResult};
use crate::models::{Collection, Item, NewItem, ShoppingList};
use crate::store::{Backend, ChangeKind, Filter};

/// Published state of a [`ListSync`]
#[derive(Debug, Clone)]
pub struct ListSnapshot {
    pub state: LoadState,
    /// The list, once loaded
    pub list: Option<ShoppingList>,
    /// Items, oldest first
    pub items: OrderedCollection<Item>,
}

impl ListSnapshot {
    fn loading() -> Self {
        Self {
            state: LoadState::Loading,
            list: None,
            items: OrderedCollection::new(),
        }
    }

    /// Items still to buy
    pub fn remaining(&self) -> usize {
        self.items.iter().filter(|item| !item.completed).count()
    }
}

impl View for ListSnapshot {
    type Row = Item;

    fn rows_mut(&mut self) -> &mut OrderedCollection<Item> {
        &mut self.items
    }
}

/// Synchronizer for one shopping list and its items
pub struct ListSync<B: Backend + ?Sized> {
    replica: Replica<B, ListSnapshot>,
}

impl<B: Backend + ?Sized> ListSync<B> {
    /// Create a synchronizer using a shared store client
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            replica: Replica::new(backend, ListSnapshot::loading()),
        }
    }

    /// Load a list and start following its changes
    ///
    /// Any previous subscription is released first. The feed is opened
    /// before the bulk fetch so nothing committed in between is missed;
    /// events already covered by the fetch merge idempotently.
    pub async fn load(&self, list_id: Uuid) -> SyncResult<LoadState> {
        let filter = Filter::list(list_id);
        let spec = FeedSpec {
            filter: filter.clone(),
            kinds: ChangeKind::ALL.to_vec(),
        };
        let (generation, subscription) = self.replica.begin(spec).await;
        self.replica.publish(generation, |view| {
            *view = ListSnapshot::loading();
            true
        });

        match self.fetch_initial(list_id, &filter).await {
            Ok(Some((list, items))) => {
                info!("Loaded list {} with {} item(s)", list.id, items.len());
                self.replica.publish(generation, |view| {
                    view.state = LoadState::Ready;
                    view.list = Some(list);
                    view.items = OrderedCollection::from_rows(items);
                    true
                });
                self.replica.start_pump(generation, subscription, filter);
                Ok(LoadState::Ready)
            }
            Ok(None) => {
                info!("List {} not found", list_id);
                self.replica.publish(generation, |view| {
                    view.state = LoadState::NotFound;
                    true
                });
                self.replica.end(generation);
                Ok(LoadState::NotFound)
            }
            Err(e) => {
                warn!("Error fetching list {}: {}", list_id, e);
                let reason = e.to_string();
                self.replica.publish(generation, |view| {
                    view.state = LoadState::Failed(reason);
                    true
                });
                self.replica.end(generation);
                Err(e)
            }
        }
    }

    async fn fetch_initial(
        &self,
        list_id: Uuid,
        filter: &Filter,
    ) -> SyncResult<Option<(ShoppingList, Vec<Item>)>> {
        let Some(row) = self
            .replica
            .backend()
            .fetch_one(Collection::Lists, &Filter::id(list_id))
            .await?
        else {
            return Ok(None);
        };
        let list: ShoppingList = serde_json::from_value(row).map_err(StoreError::from)?;
        let items = fetch_rows::<B, Item>(self.replica.backend(), filter).await?;
        Ok(Some((list, items)))
    }

    /// Current lifecycle state
    pub fn state(&self) -> LoadState {
        self.replica.view().state
    }

    /// The list, once loaded
    pub fn list(&self) -> Option<ShoppingList> {
        self.replica.view().list
    }

    /// Items, oldest first
    pub fn items(&self) -> Vec<Item> {
        self.replica.view().items.to_vec()
    }

    pub fn snapshot(&self) -> ListSnapshot {
        self.replica.view()
    }

    /// Observe every state change
    pub fn subscribe(&self) -> watch::Receiver<ListSnapshot> {
        self.replica.subscribe()
    }

    /// Feed counters (delivered and malformed events)
    pub fn diagnostics(&self) -> Arc<FeedDiagnostics> {
        self.replica.diagnostics()
    }

    /// Add an item to the list
    ///
    /// Blank text, or a list that is not `Ready`, is rejected without
    /// contacting the store. The acknowledged row is merged only if the
    /// feed has not already delivered or removed it, so a slow
    /// acknowledgement never overwrites newer changes.
    pub async fn add_item(&self, text: &str) -> SyncResult<Item> {
        let text = validate_text(text, "item text")?;
        let (generation, list_id) = self.ready()?;

        let row = serde_json::to_value(NewItem {
            list_id,
            text,
            completed: false,
        })
        .map_err(StoreError::from)?;

        let row = self
            .replica
            .backend()
            .insert(Collection::Items, row)
            .await
            .inspect_err(|e| warn!("Error adding item: {}", e))?;
        let item: Item = serde_json::from_value(row).map_err(StoreError::from)?;

        if !self
            .replica
            .publish(generation, |view| view.items.merge_ack(item.clone()))
        {
            debug!("Item {} already known to the feed or session retired", item.id);
        }
        Ok(item)
    }

    /// Flip an item's completed flag
    ///
    /// Local state follows the feed's update event, not this call's
    /// acknowledgement, so concurrent toggles settle on the store's last
    /// write. If the item is gone, reports `NotFound` and drops any local
    /// copy.
    pub async fn toggle_item(&self, item: &Item) -> SyncResult<Item> {
        let (generation, _) = self.ready()?;

        let updated = self
            .replica
            .backend()
            .update(
                Collection::Items,
                item.id,
                json!({ "completed": !item.completed }),
            )
            .await
            .inspect_err(|e| warn!("Error toggling item: {}", e))?;

        match updated {
            Some(row) => Ok(serde_json::from_value(row).map_err(StoreError::from)?),
            None => {
                self.replica
                    .publish(generation, |view| view.items.remove(item.id).is_some());
                Err(SyncError::NotFound {
                    what: "item",
                    id: item.id,
                })
            }
        }
    }

    /// Delete an item
    ///
    /// Deleting an item that is already gone reports `NotFound`, which
    /// callers may treat as success; local state is left consistent either
    /// way.
    pub async fn delete_item(&self, item_id: Uuid) -> SyncResult<()> {
        let (generation, _) = self.ready()?;

        let deleted = self
            .replica
            .backend()
            .delete(Collection::Items, item_id)
            .await
            .inspect_err(|e| warn!("Error deleting item: {}", e))?;

        // Either way the store no longer has it
        self.replica
            .publish(generation, |view| view.items.remove(item_id).is_some());

        if deleted {
            Ok(())
        } else {
            Err(SyncError::NotFound {
                what: "item",
                id: item_id,
            })
        }
    }

    /// Release the subscription; the last published state stays readable
    pub fn close(&self) {
        self.replica.close();
    }

    /// Generation and list id of the live, ready session
    fn ready(&self) -> SyncResult<(u64, Uuid)> {
        let view = self.replica.view();
        let list_id = match (&view.state, &view.list) {
            (LoadState::Ready, Some(list)) => list.id,
            _ => {
                return Err(SyncError::Validation(format!(
                    "list is not ready ({})",
                    view.state
                )))
            }
        };
        let generation = self.replica.live_generation().ok_or(SyncError::Closed)?;
        Ok((generation, list_id))
    }

    #[cfg(test)]
    fn apply_event(&self, generation: u64, event: super::feed::FeedEvent<Item>) -> bool {
        self.replica
            .publish(generation, |view| view.items.apply(event))
    }

    #[cfg(test)]
    fn generation(&self) -> Option<u64> {
        self.replica.live_generation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{Meanwhile, SlowAck};
    use crate::store::{MemoryStore, RawChange};
    use crate::sync::FeedEvent;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;
    use std::time::Duration;

    async fn store_with_list(name: &str) -> (Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let row = store
            .insert(Collection::Lists, json!({ "name": name }))
            .await
            .unwrap();
        let id = row["id"].as_str().unwrap().parse().unwrap();
        (store, id)
    }

    async fn ready_sync(name: &str) -> (Arc<MemoryStore>, ListSync<MemoryStore>, Uuid) {
        let (store, list_id) = store_with_list(name).await;
        let sync = ListSync::new(store.clone());
        assert_eq!(sync.load(list_id).await.unwrap(), LoadState::Ready);
        (store, sync, list_id)
    }

    /// Wait until the published snapshot satisfies `pred`
    async fn wait_until<B: Backend + ?Sized>(
        sync: &ListSync<B>,
        pred: impl Fn(&ListSnapshot) -> bool,
    ) {
        let mut rx = sync.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| pred(s)))
            .await
            .expect("timed out waiting for snapshot")
            .expect("synchronizer dropped");
    }

    /// Let spawned tasks drain their queues
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn item_at(list_id: Uuid, secs: i64, text: &str) -> Item {
        Item {
            id: Uuid::new_v4(),
            list_id,
            text: text.to_string(),
            completed: false,
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    fn texts(sync: &ListSync<MemoryStore>) -> Vec<String> {
        sync.items().into_iter().map(|i| i.text).collect()
    }

    #[tokio::test]
    async fn test_starts_loading() {
        let store = Arc::new(MemoryStore::new());
        let sync = ListSync::new(store);
        assert_eq!(sync.state(), LoadState::Loading);
        assert!(sync.list().is_none());
    }

    #[tokio::test]
    async fn test_load_fetches_list_and_sorted_items() {
        let (store, list_id) = store_with_list("Groceries").await;
        for text in ["Milk", "Eggs"] {
            store
                .insert(
                    Collection::Items,
                    json!({ "list_id": list_id.to_string(), "text": text, "completed": false }),
                )
                .await
                .unwrap();
        }

        let sync = ListSync::new(store.clone());
        assert_eq!(sync.load(list_id).await.unwrap(), LoadState::Ready);
        assert_eq!(sync.list().unwrap().name, "Groceries");
        assert_eq!(texts(&sync), vec!["Milk", "Eggs"]);
        assert_eq!(store.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_list_is_not_found_and_unsubscribed() {
        let store = Arc::new(MemoryStore::new());
        let sync = ListSync::new(store.clone());

        assert_eq!(
            sync.load(Uuid::new_v4()).await.unwrap(),
            LoadState::NotFound
        );
        assert_eq!(sync.state(), LoadState::NotFound);
        assert!(sync.items().is_empty());

        settle().await;
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_reload_keeps_a_single_subscription() {
        let (store, sync, _) = ready_sync("First").await;
        let row = store
            .insert(Collection::Lists, json!({ "name": "Second" }))
            .await
            .unwrap();
        let other: Uuid = row["id"].as_str().unwrap().parse().unwrap();

        sync.load(other).await.unwrap();
        settle().await;

        assert_eq!(sync.list().unwrap().name, "Second");
        assert_eq!(store.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_added_item_appears_once() {
        let (_store, sync, _) = ready_sync("Groceries").await;

        let item = sync.add_item("  Milk  ").await.unwrap();
        assert_eq!(item.text, "Milk");
        assert!(!item.completed);

        // The ack is merged at once; the feed's copy must not duplicate it
        assert_eq!(sync.items().len(), 1);
        let diagnostics = sync.diagnostics();
        tokio::time::timeout(Duration::from_secs(2), async {
            while diagnostics.delivered() < 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        settle().await;

        let items = sync.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, item.id);
    }

    #[tokio::test]
    async fn test_duplicate_insert_event_is_idempotent() {
        let (_store, sync, list_id) = ready_sync("Groceries").await;
        let generation = sync.generation().unwrap();
        let milk = item_at(list_id, 1, "Milk");

        sync.apply_event(generation, FeedEvent::Inserted(milk.clone()));
        sync.apply_event(generation, FeedEvent::Inserted(milk.clone()));

        let items = sync.items();
        assert_eq!(items.iter().filter(|i| i.id == milk.id).count(), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_feed_events_read_in_creation_order() {
        let (_store, sync, list_id) = ready_sync("Groceries").await;
        let generation = sync.generation().unwrap();
        let a = item_at(list_id, 1, "A");
        let b = item_at(list_id, 2, "B");
        let c = item_at(list_id, 3, "C");

        for item in [c, a, b] {
            sync.apply_event(generation, FeedEvent::Inserted(item));
        }
        assert_eq!(texts(&sync), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_blank_item_is_rejected_without_remote_call() {
        let (store, sync, _) = ready_sync("Groceries").await;
        let before = store.calls();

        let err = sync.add_item("   ").await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(store.calls(), before);
        assert!(sync.items().is_empty());
    }

    #[tokio::test]
    async fn test_add_before_ready_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let sync = ListSync::new(store.clone());

        let err = sync.add_item("Milk").await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(store.calls().insert, 0);
    }

    #[tokio::test]
    async fn test_toggle_follows_feed() {
        let (_store, sync, _) = ready_sync("Groceries").await;
        let item = sync.add_item("Bread").await.unwrap();

        let updated = sync.toggle_item(&item).await.unwrap();
        assert!(updated.completed);

        wait_until(&sync, |s| {
            s.items.get(item.id).map(|i| i.completed) == Some(true)
        })
        .await;
        assert_eq!(sync.snapshot().remaining(), 0);
    }

    #[tokio::test]
    async fn test_toggle_after_delete_reports_not_found() {
        let (_store, sync, _) = ready_sync("Groceries").await;
        let item = sync.add_item("Butter").await.unwrap();

        sync.delete_item(item.id).await.unwrap();
        let err = sync.toggle_item(&item).await.unwrap_err();
        assert!(err.is_not_found());

        settle().await;
        assert!(!sync.items().iter().any(|i| i.id == item.id));
    }

    #[tokio::test]
    async fn test_delete_twice_reports_not_found() {
        let (_store, sync, _) = ready_sync("Groceries").await;
        let item = sync.add_item("Jam").await.unwrap();
        sync.add_item("Tea").await.unwrap();

        sync.delete_item(item.id).await.unwrap();
        let err = sync.delete_item(item.id).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.is_recoverable());

        let err = sync.delete_item(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());

        settle().await;
        assert_eq!(texts(&sync), vec!["Tea"]);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_untouched() {
        let (store, sync, _) = ready_sync("Groceries").await;
        let item = sync.add_item("Apples").await.unwrap();
        settle().await;
        let before = sync.items();

        store.fail_next_write(StoreError::Request("connection reset".to_string()));
        let err = sync.add_item("Pears").await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));

        store.fail_next_write(StoreError::Request("connection reset".to_string()));
        assert!(sync.delete_item(item.id).await.is_err());

        assert_eq!(sync.items(), before);
    }

    #[tokio::test]
    async fn test_malformed_delete_is_dropped_and_counted() {
        let (store, sync, _) = ready_sync("Groceries").await;
        sync.add_item("Rice").await.unwrap();
        settle().await;
        let before = sync.items();

        let delivered = store.inject(
            Collection::Items,
            RawChange {
                kind: ChangeKind::Delete,
                record: None,
                old_record: Some(json!({})),
            },
        );
        assert_eq!(delivered, 1);
        settle().await;

        assert_eq!(sync.items(), before);
        assert_eq!(sync.diagnostics().malformed(), 1);
    }

    #[tokio::test]
    async fn test_events_after_close_do_not_mutate() {
        let (store, sync, list_id) = ready_sync("Groceries").await;
        sync.add_item("Oats").await.unwrap();
        settle().await;
        let generation = sync.generation().unwrap();
        let before = sync.items();

        sync.close();
        assert!(sync.generation().is_none());

        // A late event for the closed session, delivered directly
        assert!(!sync.apply_event(
            generation,
            FeedEvent::Inserted(item_at(list_id, 99, "Late"))
        ));

        // And a change committed by another client after close
        store
            .insert(
                Collection::Items,
                json!({ "list_id": list_id.to_string(), "text": "Other", "completed": false }),
            )
            .await
            .unwrap();
        settle().await;

        assert_eq!(sync.items(), before);
        assert_eq!(store.subscriber_count(), 0);

        let err = sync.add_item("After close").await.unwrap_err();
        assert!(matches!(err, SyncError::Closed));
    }

    #[tokio::test]
    async fn test_remote_changes_from_other_clients_arrive() {
        let (store, sync, list_id) = ready_sync("Shared").await;
        let other = ListSync::new(store.clone());
        other.load(list_id).await.unwrap();

        let item = other.add_item("From the other phone").await.unwrap();
        wait_until(&sync, |s| s.items.contains(item.id)).await;

        other.delete_item(item.id).await.unwrap();
        wait_until(&sync, |s| !s.items.contains(item.id)).await;
    }

    #[tokio::test]
    async fn test_reconnect_refetches_missed_changes() {
        let (store, sync, list_id) = ready_sync("Groceries").await;

        // Committed while the feed was down, so never delivered
        let missed = store.insert_silently(
            Collection::Items,
            json!({ "list_id": list_id.to_string(), "text": "Missed", "completed": false }),
        );
        let missed_id: Uuid = missed["id"].as_str().unwrap().parse().unwrap();
        settle().await;
        assert!(sync.items().is_empty());

        store.simulate_reconnect();
        wait_until(&sync, |s| s.items.contains(missed_id)).await;
    }

    #[tokio::test]
    async fn test_observers_see_state_changes() {
        let (store, list_id) = store_with_list("Groceries").await;
        let sync = ListSync::new(store);
        let mut rx = sync.subscribe();

        sync.load(list_id).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().state, LoadState::Ready);

        sync.add_item("Cheese").await.unwrap();
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_fetch_failure_ends_in_failed_state() {
        struct Unreachable;

        #[async_trait::async_trait]
        impl Backend for Unreachable {
            async fn fetch_one(&self, _: Collection, _: &Filter) -> crate::error::StoreResult<Option<Value>> {
                Err(StoreError::Request("offline".to_string()))
            }
            async fn fetch_many(
                &self,
                _: Collection,
                _: &Filter,
                _: crate::store::OrderBy,
            ) -> crate::error::StoreResult<Vec<Value>> {
                Err(StoreError::Request("offline".to_string()))
            }
            async fn insert(&self, _: Collection, _: Value) -> crate::error::StoreResult<Value> {
                Err(StoreError::Request("offline".to_string()))
            }
            async fn update(&self, _: Collection, _: Uuid, _: Value) -> crate::error::StoreResult<Option<Value>> {
                Err(StoreError::Request("offline".to_string()))
            }
            async fn delete(&self, _: Collection, _: Uuid) -> crate::error::StoreResult<bool> {
                Err(StoreError::Request("offline".to_string()))
            }
            async fn subscribe(
                &self,
                _: Collection,
                _: &Filter,
                _: &[ChangeKind],
            ) -> crate::error::StoreResult<crate::store::RawSubscription> {
                Err(StoreError::Connection("offline".to_string()))
            }
            fn unsubscribe(&self, _: crate::store::SubscriptionId) {}
        }

        let sync = ListSync::new(Arc::new(Unreachable));
        let err = sync.load(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
        assert!(matches!(sync.state(), LoadState::Failed(_)));
        assert!(sync.diagnostics().is_degraded());
    }

    async fn slow_ack_sync(meanwhile: Meanwhile) -> (Arc<SlowAck>, ListSync<SlowAck>) {
        let (store, list_id) = store_with_list("Groceries").await;
        let backend = Arc::new(SlowAck::new(store, meanwhile));
        let sync = ListSync::new(backend.clone());
        assert_eq!(sync.load(list_id).await.unwrap(), LoadState::Ready);
        (backend, sync)
    }

    #[tokio::test]
    async fn test_late_ack_does_not_resurrect_deleted_item() {
        let (backend, sync) = slow_ack_sync(Meanwhile::Delete).await;

        let item = sync.add_item("Milk").await.unwrap();
        settle().await;

        assert!(backend.store.rows(Collection::Items).is_empty());
        assert!(!sync.snapshot().items.contains(item.id));
        assert!(sync.items().is_empty());
    }

    #[tokio::test]
    async fn test_late_ack_does_not_undo_newer_update() {
        let (backend, sync) =
            slow_ack_sync(Meanwhile::Patch(json!({ "completed": true }))).await;

        let item = sync.add_item("Milk").await.unwrap();
        assert!(!item.completed);
        settle().await;

        let stored = backend.store.rows(Collection::Items);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["completed"], true);
        assert!(sync.snapshot().items.get(item.id).unwrap().completed);
    }

    #[tokio::test]
    async fn test_delete_from_another_list_leaves_items_alone() {
        let (store, sync, _) = ready_sync("Groceries").await;
        sync.add_item("Milk").await.unwrap();
        sync.add_item("Eggs").await.unwrap();
        settle().await;

        let other_list = Uuid::new_v4();
        let row = store
            .insert(
                Collection::Items,
                json!({ "list_id": other_list.to_string(), "text": "Nails", "completed": false }),
            )
            .await
            .unwrap();
        let other_id: Uuid = row["id"].as_str().unwrap().parse().unwrap();
        let before = sync.diagnostics().delivered();

        // Delete payloads carry only the id, so this one reaches us too
        assert!(store.delete(Collection::Items, other_id).await.unwrap());
        let diagnostics = sync.diagnostics();
        tokio::time::timeout(Duration::from_secs(2), async {
            while diagnostics.delivered() == before {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("delete was not delivered");
        settle().await;

        assert_eq!(texts(&sync), vec!["Milk", "Eggs"]);
    }

    #[tokio::test]
    async fn test_works_through_trait_object() {
        let (store, list_id) = store_with_list("Dyn").await;
        let backend: Arc<dyn Backend> = store;
        let sync = ListSync::new(backend);
        assert_eq!(sync.load(list_id).await.unwrap(), LoadState::Ready);
        sync.add_item("Coffee").await.unwrap();
        assert_eq!(sync.items().len(), 1);
    }
}
