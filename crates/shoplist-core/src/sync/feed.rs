//! Change-feed client
//!
//! Wraps a backend subscription and turns its untyped payloads into typed
//! [`FeedEvent`]s for a single listener. Payloads are validated here, at
//! the boundary: a change missing its row (or a delete missing its id) is
//! logged, counted in [`FeedDiagnostics`], and dropped, so malformed data
//! never reaches a synchronizer.
//!
//! ## Lifecycle
//!
//! - [`Subscription::open`] registers with the backend and returns without
//!   waiting for the transport to connect. If registration fails the
//!   subscription is degraded: it stays open but delivers nothing.
//! - [`FeedHandle::close`] is idempotent and may race with delivery; once it
//!   returns, [`Subscription::next`] yields nothing more.
//! - Dropping the [`Subscription`] closes it.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::models::Record;
use crate::store::{Backend, ChangeKind, FeedMessage, Filter, RawChange, SubscriptionId};

/// A typed change delivered to the listener
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent<T> {
    /// A row was inserted (full row)
    Inserted(T),
    /// A row was updated (full row)
    Updated(T),
    /// A row was deleted (identifier only)
    Deleted(Uuid),
    /// The transport reconnected; changes may have been missed
    Resubscribed,
}

/// What to subscribe to
#[derive(Debug, Clone)]
pub struct FeedSpec {
    pub filter: Filter,
    pub kinds: Vec<ChangeKind>,
}

/// Counters a caller (or test) can inspect
#[derive(Debug, Default)]
pub struct FeedDiagnostics {
    delivered: AtomicU64,
    malformed: AtomicU64,
    degraded: AtomicBool,
}

impl FeedDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events handed to the listener
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Payloads dropped for missing required fields
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Whether the last subscription attempt failed to register
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }
}

/// Parse a raw change into a typed event
pub fn parse_change<T: Record>(change: RawChange) -> SyncResult<FeedEvent<T>> {
    match change.kind {
        ChangeKind::Insert => decode_row(change.record, "insert").map(FeedEvent::Inserted),
        ChangeKind::Update => decode_row(change.record, "update").map(FeedEvent::Updated),
        ChangeKind::Delete => {
            let id = change
                .old_record
                .as_ref()
                .and_then(|old| old.get("id"))
                .and_then(|id| id.as_str())
                .ok_or_else(|| SyncError::MalformedEvent {
                    kind: "delete",
                    details: "missing id".to_string(),
                })?;
            let id = id.parse::<Uuid>().map_err(|e| SyncError::MalformedEvent {
                kind: "delete",
                details: format!("invalid id {:?}: {}", id, e),
            })?;
            Ok(FeedEvent::Deleted(id))
        }
    }
}

fn decode_row<T: Record>(record: Option<serde_json::Value>, kind: &'static str) -> SyncResult<T> {
    let record = record.ok_or_else(|| SyncError::MalformedEvent {
        kind,
        details: "missing record".to_string(),
    })?;
    serde_json::from_value(record).map_err(|e| SyncError::MalformedEvent {
        kind,
        details: e.to_string(),
    })
}

/// Control side of a subscription; cheap to clone
#[derive(Debug, Clone)]
pub struct FeedHandle {
    closed: Arc<AtomicBool>,
    task: Option<AbortHandle>,
}

impl FeedHandle {
    /// Stop delivery and release the backend subscription
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = &self.task {
            task.abort();
        }
        debug!("Change feed closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Releases the backend subscription when the forwarding task ends
struct Release<B: Backend + ?Sized> {
    backend: Arc<B>,
    id: SubscriptionId,
}

impl<B: Backend + ?Sized> Drop for Release<B> {
    fn drop(&mut self) {
        self.backend.unsubscribe(self.id);
    }
}

/// A live change feed with a single listener
pub struct Subscription<T> {
    events: mpsc::UnboundedReceiver<FeedEvent<T>>,
    handle: FeedHandle,
    _row: PhantomData<fn() -> T>,
}

impl<T: Record> Subscription<T> {
    /// Subscribe to changes of `T`'s collection matching `spec`
    ///
    /// Never fails: if the backend refuses the subscription a warning is
    /// logged and the returned subscription delivers nothing.
    pub async fn open<B>(backend: Arc<B>, spec: FeedSpec, diagnostics: Arc<FeedDiagnostics>) -> Self
    where
        B: Backend + ?Sized,
    {
        let (tx, events) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let raw = match backend
            .subscribe(T::COLLECTION, &spec.filter, &spec.kinds)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    "Change feed for {} ({}) unavailable: {}",
                    T::COLLECTION.table(),
                    spec.filter,
                    e
                );
                diagnostics.degraded.store(true, Ordering::Relaxed);
                return Self {
                    events,
                    handle: FeedHandle { closed, task: None },
                    _row: PhantomData,
                };
            }
        };
        diagnostics.degraded.store(false, Ordering::Relaxed);
        debug!(
            "Change feed {} open on {} ({})",
            raw.id,
            T::COLLECTION.table(),
            spec.filter
        );

        let release = Release {
            backend: Arc::clone(&backend),
            id: raw.id,
        };
        let task = tokio::spawn(forward::<T, B>(
            raw.messages,
            tx,
            Arc::clone(&closed),
            diagnostics,
            release,
        ));

        Self {
            events,
            handle: FeedHandle {
                closed,
                task: Some(task.abort_handle()),
            },
            _row: PhantomData,
        }
    }

    /// Next event, or `None` once the feed is closed or has ended
    pub async fn next(&mut self) -> Option<FeedEvent<T>> {
        if self.handle.is_closed() {
            return None;
        }
        let event = self.events.recv().await?;
        // close() may have run while we were waiting
        if self.handle.is_closed() {
            return None;
        }
        Some(event)
    }

    pub fn handle(&self) -> FeedHandle {
        self.handle.clone()
    }

    pub fn close(&mut self) {
        self.handle.close();
        self.events.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.handle.close();
    }
}

/// Forward raw messages to the listener until closed
async fn forward<T, B>(
    mut messages: mpsc::UnboundedReceiver<FeedMessage>,
    tx: mpsc::UnboundedSender<FeedEvent<T>>,
    closed: Arc<AtomicBool>,
    diagnostics: Arc<FeedDiagnostics>,
    release: Release<B>,
) where
    T: Record,
    B: Backend + ?Sized,
{
    let _release = release;

    while let Some(message) = messages.recv().await {
        if closed.load(Ordering::Acquire) {
            break;
        }

        let event = match message {
            FeedMessage::Resubscribed => FeedEvent::Resubscribed,
            FeedMessage::Change(change) => match parse_change::<T>(change) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Dropping change on {}: {}", T::COLLECTION.table(), e);
                    diagnostics.malformed.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            },
        };

        if tx.send(event).is_err() {
            break;
        }
        diagnostics.delivered.fetch_add(1, Ordering::Relaxed);
    }
}
