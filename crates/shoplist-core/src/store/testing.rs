//! Test backends

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{
    Backend, ChangeKind, Filter, MemoryStore, OrderBy, RawSubscription, SubscriptionId,
};
use crate::error::StoreResult;
use crate::models::Collection;

/// What another client does to a row between its insert and our ack
pub(crate) enum Meanwhile {
    Delete,
    Patch(Value),
}

/// A [`MemoryStore`] whose insert acknowledgements arrive late
///
/// After committing an insert it lets another writer change the row, then
/// holds the acknowledgement back long enough for the feed to deliver both.
pub(crate) struct SlowAck {
    pub store: Arc<MemoryStore>,
    meanwhile: Meanwhile,
    delay: Duration,
}

impl SlowAck {
    pub fn new(store: Arc<MemoryStore>, meanwhile: Meanwhile) -> Self {
        Self {
            store,
            meanwhile,
            delay: Duration::from_millis(100),
        }
    }
}

#[async_trait]
impl Backend for SlowAck {
    async fn fetch_one(&self, collection: Collection, filter: &Filter) -> StoreResult<Option<Value>> {
        self.store.fetch_one(collection, filter).await
    }

    async fn fetch_many(
        &self,
        collection: Collection,
        filter: &Filter,
        order: OrderBy,
    ) -> StoreResult<Vec<Value>> {
        self.store.fetch_many(collection, filter, order).await
    }

    async fn insert(&self, collection: Collection, row: Value) -> StoreResult<Value> {
        let row = self.store.insert(collection, row).await?;
        let id: Uuid = row["id"]
            .as_str()
            .and_then(|id| id.parse().ok())
            .unwrap_or_default();

        match &self.meanwhile {
            Meanwhile::Delete => {
                self.store.delete(collection, id).await?;
            }
            Meanwhile::Patch(patch) => {
                self.store.update(collection, id, patch.clone()).await?;
            }
        }
        tokio::time::sleep(self.delay).await;
        Ok(row)
    }

    async fn update(&self, collection: Collection, id: Uuid, patch: Value) -> StoreResult<Option<Value>> {
        self.store.update(collection, id, patch).await
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> StoreResult<bool> {
        self.store.delete(collection, id).await
    }

    async fn subscribe(
        &self,
        collection: Collection,
        filter: &Filter,
        kinds: &[ChangeKind],
    ) -> StoreResult<RawSubscription> {
        self.store.subscribe(collection, filter, kinds).await
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.store.unsubscribe(id)
    }
}
