//! Remote store backed by Supabase
//!
//! Requests go to PostgREST; subscriptions share one realtime websocket.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use super::realtime::RealtimeSocket;
use super::rest::RestClient;
use super::{
    Backend, ChangeKind, ConnectionStatus, Filter, OrderBy, RawSubscription, RealtimeConfig,
    SubscriptionId,
};
use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::models::Collection;

/// [`Backend`] talking to a Supabase project
pub struct SupabaseStore {
    rest: RestClient,
    realtime: RealtimeSocket,
}

impl SupabaseStore {
    /// Connect to a store. Must be called within a tokio runtime, since the
    /// realtime connection runs as a background task.
    pub fn new(store_url: &str, api_key: &str, realtime: RealtimeConfig) -> StoreResult<Self> {
        Ok(Self {
            rest: RestClient::new(store_url, api_key)?,
            realtime: RealtimeSocket::spawn(realtime),
        })
    }

    /// Build a store from application configuration
    pub fn from_config(config: &Config) -> StoreResult<Self> {
        let Some(ref store_url) = config.store_url else {
            return Err(StoreError::Unavailable(
                "store_url is not configured".to_string(),
            ));
        };
        let Some(ref api_key) = config.api_key else {
            return Err(StoreError::Unavailable("api_key is not configured".to_string()));
        };

        let realtime = RealtimeConfig {
            heartbeat_interval: config.heartbeat_interval(),
            initial_reconnect_delay: config.initial_reconnect_delay(),
            max_reconnect_delay: config.max_reconnect_delay(),
            ..RealtimeConfig::for_store(store_url, api_key)
        };
        Self::new(store_url, api_key, realtime)
    }

    /// Watch the realtime connection status
    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.realtime.subscribe_status()
    }
}

#[async_trait]
impl Backend for SupabaseStore {
    async fn fetch_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> StoreResult<Option<Value>> {
        let rows = self
            .rest
            .select(collection.table(), filter, None, Some(1))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_many(
        &self,
        collection: Collection,
        filter: &Filter,
        order: OrderBy,
    ) -> StoreResult<Vec<Value>> {
        self.rest
            .select(collection.table(), filter, Some(order), None)
            .await
    }

    async fn insert(&self, collection: Collection, row: Value) -> StoreResult<Value> {
        self.rest.insert(collection.table(), row).await
    }

    async fn update(
        &self,
        collection: Collection,
        id: Uuid,
        patch: Value,
    ) -> StoreResult<Option<Value>> {
        self.rest.update(collection.table(), id, patch).await
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> StoreResult<bool> {
        self.rest.delete(collection.table(), id).await
    }

    async fn subscribe(
        &self,
        collection: Collection,
        filter: &Filter,
        kinds: &[ChangeKind],
    ) -> StoreResult<RawSubscription> {
        self.realtime.join(collection, filter, kinds)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.realtime.leave(id);
    }
}
