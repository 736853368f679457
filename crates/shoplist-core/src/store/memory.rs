//! In-process store
//!
//! Behaves like the remote store as far as the synchronizers can tell:
//! assigns ids and timestamps, routes change notifications to matching
//! subscribers, and reports deletes with only the primary key. Extra hooks
//! let tests inject faults, raw payloads, missed changes, and reconnects.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{
    Backend, ChangeKind, FeedMessage, Filter, OrderBy, RawChange, RawSubscription,
    SubscriptionId,
};
use crate::error::{StoreError, StoreResult};
use crate::models::Collection;

/// Number of calls made against a [`MemoryStore`], per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub fetch: usize,
    pub insert: usize,
    pub update: usize,
    pub delete: usize,
    pub subscribe: usize,
    pub unsubscribe: usize,
}

impl StoreCalls {
    /// Calls that write to the store
    pub fn writes(&self) -> usize {
        self.insert + self.update + self.delete
    }
}

struct Subscriber {
    id: SubscriptionId,
    collection: Collection,
    filter: Filter,
    kinds: Vec<ChangeKind>,
    tx: mpsc::UnboundedSender<FeedMessage>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<Collection, Vec<Value>>,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
    last_timestamp: Option<DateTime<Utc>>,
    calls: StoreCalls,
    fail_next_write: Option<StoreError>,
}

impl Inner {
    /// Strictly increasing server clock
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    fn take_write_fault(&mut self) -> StoreResult<()> {
        match self.fail_next_write.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn table(&mut self, collection: Collection) -> &mut Vec<Value> {
        self.tables.entry(collection).or_default()
    }

    fn position(&mut self, collection: Collection, id: Uuid) -> Option<usize> {
        let id = id.to_string();
        self.table(collection)
            .iter()
            .position(|row| row.get("id").and_then(Value::as_str) == Some(id.as_str()))
    }

    /// Route a change to every subscriber whose filter matches `scope`
    ///
    /// Deletes go to every subscriber of the collection: their payload holds
    /// only the primary key, so the remote store cannot filter them either.
    fn notify(&mut self, collection: Collection, scope: &Value, change: RawChange) {
        let filtered = change.kind != ChangeKind::Delete;
        self.subscribers.retain(|sub| {
            if sub.collection != collection
                || !sub.kinds.contains(&change.kind)
                || (filtered && !sub.filter.matches(scope))
            {
                return true;
            }
            // A dropped receiver means the subscriber is gone
            sub.tx.send(FeedMessage::Change(change.clone())).is_ok()
        });
    }
}

/// Shared in-memory implementation of [`Backend`]
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Calls made so far
    pub fn calls(&self) -> StoreCalls {
        self.lock().calls
    }

    /// Make the next insert, update, or delete fail with `error`
    pub fn fail_next_write(&self, error: StoreError) {
        self.lock().fail_next_write = Some(error);
    }

    /// Current rows of a collection, in insertion order
    pub fn rows(&self, collection: Collection) -> Vec<Value> {
        self.lock().table(collection).clone()
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|sub| !sub.tx.is_closed());
        inner.subscribers.len()
    }

    /// Insert a row without notifying anyone, as if the change was missed
    pub fn insert_silently(&self, collection: Collection, row: Value) -> Value {
        let mut inner = self.lock();
        let row = stamp_row(&mut inner, row);
        inner.table(collection).push(row.clone());
        row
    }

    /// Deliver a raw change to every subscriber of `collection`, bypassing
    /// filters. Returns how many subscribers received it.
    pub fn inject(&self, collection: Collection, change: RawChange) -> usize {
        let mut inner = self.lock();
        let mut delivered = 0;
        inner.subscribers.retain(|sub| {
            if sub.collection != collection {
                return true;
            }
            let ok = sub.tx.send(FeedMessage::Change(change.clone())).is_ok();
            if ok {
                delivered += 1;
            }
            ok
        });
        delivered
    }

    /// Tell every subscriber its transport dropped and came back
    pub fn simulate_reconnect(&self) {
        let mut inner = self.lock();
        inner
            .subscribers
            .retain(|sub| sub.tx.send(FeedMessage::Resubscribed).is_ok());
    }
}

/// Give a new row its server-assigned id and timestamp
fn stamp_row(inner: &mut Inner, row: Value) -> Value {
    let mut row = match row {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    row.entry("id")
        .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    if !row.contains_key("created_at") {
        let ts = inner.next_timestamp();
        row.insert("created_at".to_string(), json!(ts));
    }
    Value::Object(row)
}

fn sort_rows(rows: &mut [Value], order: OrderBy) {
    // Timestamps have a variable number of fractional digits, so compare
    // them parsed rather than as text
    fn key(row: &Value, column: &str) -> (Option<DateTime<Utc>>, String) {
        let value = row.get(column);
        let parsed = value
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<DateTime<Utc>>().ok());
        (parsed, value.map(Value::to_string).unwrap_or_default())
    }

    rows.sort_by(|a, b| {
        let ord = key(a, order.column).cmp(&key(b, order.column));
        if order.ascending {
            ord
        } else {
            ord.reverse()
        }
    });
}

#[async_trait]
impl Backend for MemoryStore {
    async fn fetch_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> StoreResult<Option<Value>> {
        let mut inner = self.lock();
        inner.calls.fetch += 1;
        Ok(inner
            .table(collection)
            .iter()
            .find(|row| filter.matches(row))
            .cloned())
    }

    async fn fetch_many(
        &self,
        collection: Collection,
        filter: &Filter,
        order: OrderBy,
    ) -> StoreResult<Vec<Value>> {
        let mut inner = self.lock();
        inner.calls.fetch += 1;
        let mut rows: Vec<Value> = inner
            .table(collection)
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        sort_rows(&mut rows, order);
        Ok(rows)
    }

    async fn insert(&self, collection: Collection, row: Value) -> StoreResult<Value> {
        let mut inner = self.lock();
        inner.calls.insert += 1;
        inner.take_write_fault()?;

        let row = stamp_row(&mut inner, row);
        inner.table(collection).push(row.clone());
        debug!("Inserted row into {}", collection.table());

        inner.notify(
            collection,
            &row,
            RawChange {
                kind: ChangeKind::Insert,
                record: Some(row.clone()),
                old_record: None,
            },
        );
        Ok(row)
    }

    async fn update(
        &self,
        collection: Collection,
        id: Uuid,
        patch: Value,
    ) -> StoreResult<Option<Value>> {
        let mut inner = self.lock();
        inner.calls.update += 1;
        inner.take_write_fault()?;

        let Some(pos) = inner.position(collection, id) else {
            return Ok(None);
        };
        let row = &mut inner.table(collection)[pos];
        if let (Value::Object(target), Value::Object(fields)) = (&mut *row, patch) {
            for (key, value) in fields {
                target.insert(key, value);
            }
        }
        let row = row.clone();

        inner.notify(
            collection,
            &row,
            RawChange {
                kind: ChangeKind::Update,
                record: Some(row.clone()),
                old_record: Some(json!({ "id": id.to_string() })),
            },
        );
        Ok(Some(row))
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.lock();
        inner.calls.delete += 1;
        inner.take_write_fault()?;

        let Some(pos) = inner.position(collection, id) else {
            return Ok(false);
        };
        let old = inner.table(collection).remove(pos);

        // Deletes only carry the primary key, like the remote store
        inner.notify(
            collection,
            &old,
            RawChange {
                kind: ChangeKind::Delete,
                record: None,
                old_record: Some(json!({ "id": id.to_string() })),
            },
        );
        Ok(true)
    }

    async fn subscribe(
        &self,
        collection: Collection,
        filter: &Filter,
        kinds: &[ChangeKind],
    ) -> StoreResult<RawSubscription> {
        let mut inner = self.lock();
        inner.calls.subscribe += 1;
        inner.next_subscription += 1;
        let id = SubscriptionId(inner.next_subscription);
        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.push(Subscriber {
            id,
            collection,
            filter: filter.clone(),
            kinds: kinds.to_vec(),
            tx,
        });
        debug!("Registered {} on {} ({})", id, collection.table(), filter);
        Ok(RawSubscription { id, messages: rx })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|sub| sub.id != id);
        if inner.subscribers.len() != before {
            inner.calls.unsubscribe += 1;
            debug!("Released {}", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_row(list_id: Uuid, text: &str) -> Value {
        json!({ "list_id": list_id.to_string(), "text": text, "completed": false })
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_timestamp() {
        let store = MemoryStore::new();
        let row = store
            .insert(Collection::Items, item_row(Uuid::new_v4(), "Milk"))
            .await
            .unwrap();
        assert!(row.get("id").and_then(Value::as_str).is_some());
        assert!(row.get("created_at").is_some());
        assert_eq!(store.calls().insert, 1);
    }

    #[tokio::test]
    async fn test_timestamps_strictly_increase() {
        let store = MemoryStore::new();
        let list_id = Uuid::new_v4();
        let mut last: Option<DateTime<Utc>> = None;
        for i in 0..20 {
            let row = store
                .insert(Collection::Items, item_row(list_id, &i.to_string()))
                .await
                .unwrap();
            let ts: DateTime<Utc> =
                serde_json::from_value(row.get("created_at").cloned().unwrap()).unwrap();
            if let Some(prev) = last {
                assert!(ts > prev);
            }
            last = Some(ts);
        }
    }

    #[tokio::test]
    async fn test_subscriber_sees_only_matching_list() {
        let store = MemoryStore::new();
        let mine = Uuid::new_v4();
        let mut sub = store
            .subscribe(Collection::Items, &Filter::list(mine), &ChangeKind::ALL)
            .await
            .unwrap();

        store
            .insert(Collection::Items, item_row(Uuid::new_v4(), "Other"))
            .await
            .unwrap();
        store
            .insert(Collection::Items, item_row(mine, "Bread"))
            .await
            .unwrap();

        match sub.messages.try_recv().unwrap() {
            FeedMessage::Change(change) => {
                assert_eq!(change.kind, ChangeKind::Insert);
                assert_eq!(change.record.unwrap()["text"], "Bread");
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(sub.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delete_notification_carries_only_id() {
        let store = MemoryStore::new();
        let list_id = Uuid::new_v4();
        let row = store
            .insert(Collection::Items, item_row(list_id, "Eggs"))
            .await
            .unwrap();
        let id: Uuid = row["id"].as_str().unwrap().parse().unwrap();
        let mut sub = store
            .subscribe(Collection::Items, &Filter::list(list_id), &[ChangeKind::Delete])
            .await
            .unwrap();

        assert!(store.delete(Collection::Items, id).await.unwrap());
        assert!(!store.delete(Collection::Items, id).await.unwrap());

        let FeedMessage::Change(change) = sub.messages.try_recv().unwrap() else {
            panic!("expected a change");
        };
        assert_eq!(change.kind, ChangeKind::Delete);
        assert_eq!(change.old_record.unwrap(), json!({ "id": id.to_string() }));
    }

    #[tokio::test]
    async fn test_deletes_are_not_filtered_by_list() {
        let store = MemoryStore::new();
        let mine = Uuid::new_v4();
        let row = store
            .insert(Collection::Items, item_row(Uuid::new_v4(), "Someone else's"))
            .await
            .unwrap();
        let id: Uuid = row["id"].as_str().unwrap().parse().unwrap();
        let mut sub = store
            .subscribe(Collection::Items, &Filter::list(mine), &ChangeKind::ALL)
            .await
            .unwrap();

        store.delete(Collection::Items, id).await.unwrap();

        let FeedMessage::Change(change) = sub.messages.try_recv().unwrap() else {
            panic!("expected a change");
        };
        assert_eq!(change.kind, ChangeKind::Delete);
    }

    #[tokio::test]
    async fn test_update_missing_row_returns_none() {
        let store = MemoryStore::new();
        let result = store
            .update(Collection::Items, Uuid::new_v4(), json!({ "completed": true }))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_fail_next_write_is_one_shot() {
        let store = MemoryStore::new();
        store.fail_next_write(StoreError::Request("offline".to_string()));
        let list_id = Uuid::new_v4();
        assert!(store
            .insert(Collection::Items, item_row(list_id, "A"))
            .await
            .is_err());
        assert!(store
            .insert(Collection::Items, item_row(list_id, "A"))
            .await
            .is_ok());
        assert_eq!(store.rows(Collection::Items).len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let store = MemoryStore::new();
        let sub = store
            .subscribe(Collection::Items, &Filter::list(Uuid::new_v4()), &ChangeKind::ALL)
            .await
            .unwrap();
        store.unsubscribe(sub.id);
        store.unsubscribe(sub.id);
        assert_eq!(store.calls().unsubscribe, 1);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_many_orders_by_column() {
        let store = MemoryStore::new();
        let list_id = Uuid::new_v4();
        for text in ["first", "second", "third"] {
            store
                .insert(Collection::Items, item_row(list_id, text))
                .await
                .unwrap();
        }
        let desc = store
            .fetch_many(
                Collection::Items,
                &Filter::list(list_id),
                OrderBy::desc("created_at"),
            )
            .await
            .unwrap();
        let texts: Vec<_> = desc.iter().map(|r| r["text"].as_str().unwrap()).collect();
        assert_eq!(texts, vec!["third", "second", "first"]);
    }
}
