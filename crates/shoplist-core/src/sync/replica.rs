//! Shared synchronizer machinery
//!
//! A `Replica` owns one published view, the change-feed session feeding it,
//! and the task pumping feed events into it. Every mutation of the view is
//! tagged with the session generation it belongs to; once a session is torn
//! down (or replaced by a reload) its generation is retired and late
//! mutations from it are discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::collection::OrderedCollection;
use super::feed::{FeedDiagnostics, FeedEvent, FeedHandle, FeedSpec, Subscription};
use crate::error::{StoreError, SyncError, SyncResult};
use crate::models::{Record, SortOrder};
use crate::store::{Backend, Filter, OrderBy};

/// A published view containing one synced collection
pub(crate) trait View: Clone + Send + Sync + 'static {
    type Row: Record;

    fn rows_mut(&mut self) -> &mut OrderedCollection<Self::Row>;
}

struct Session {
    generation: u64,
    feed: FeedHandle,
    pump: Option<JoinHandle<()>>,
}

impl Session {
    fn shutdown(self) {
        self.feed.close();
        if let Some(pump) = self.pump {
            pump.abort();
        }
    }
}

pub(crate) struct Replica<B: ?Sized, V> {
    backend: Arc<B>,
    view: Arc<watch::Sender<V>>,
    generation: Arc<AtomicU64>,
    session: Mutex<Option<Session>>,
    diagnostics: Arc<FeedDiagnostics>,
}

impl<B, V> Replica<B, V>
where
    B: Backend + ?Sized,
    V: View,
{
    pub fn new(backend: Arc<B>, initial: V) -> Self {
        let (view, _) = watch::channel(initial);
        Self {
            backend,
            view: Arc::new(view),
            generation: Arc::new(AtomicU64::new(0)),
            session: Mutex::new(None),
            diagnostics: Arc::new(FeedDiagnostics::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn view(&self) -> V {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<V> {
        self.view.subscribe()
    }

    pub fn diagnostics(&self) -> Arc<FeedDiagnostics> {
        Arc::clone(&self.diagnostics)
    }

    /// Generation of the live session, if there is one
    pub fn live_generation(&self) -> Option<u64> {
        self.lock_session().as_ref().map(|s| s.generation)
    }

    /// Tear down any previous session and open a feed for a new one
    pub async fn begin(&self, spec: FeedSpec) -> (u64, Subscription<V::Row>) {
        self.close();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let subscription =
            Subscription::open(Arc::clone(&self.backend), spec, self.diagnostics()).await;

        let mut session = self.lock_session();
        if self.is_current(generation) {
            if let Some(previous) = session.take() {
                previous.shutdown();
            }
            *session = Some(Session {
                generation,
                feed: subscription.handle(),
                pump: None,
            });
        }
        (generation, subscription)
    }

    /// Mutate the view on behalf of `generation`
    ///
    /// Does nothing (and returns `false`) if that generation has been
    /// retired, or if `f` reports no change.
    pub fn publish(&self, generation: u64, f: impl FnOnce(&mut V) -> bool) -> bool {
        publish(&self.view, &self.generation, generation, f)
    }

    /// Start applying feed events for `generation`
    ///
    /// A subscription for a retired generation is dropped, which closes it.
    pub fn start_pump(&self, generation: u64, subscription: Subscription<V::Row>, filter: Filter) {
        let mut session = self.lock_session();
        match session.as_mut() {
            Some(s) if s.generation == generation && self.is_current(generation) => {
                s.pump = Some(tokio::spawn(pump(
                    Arc::clone(&self.backend),
                    Arc::clone(&self.view),
                    Arc::clone(&self.generation),
                    generation,
                    subscription,
                    filter,
                )));
            }
            _ => debug!("Discarding feed for retired session {}", generation),
        }
    }

    /// End the session for `generation` if it is still the live one
    pub fn end(&self, generation: u64) {
        let mut session = self.lock_session();
        if session.as_ref().map(|s| s.generation) == Some(generation) {
            if let Some(s) = session.take() {
                s.shutdown();
            }
        }
    }

    /// Retire the current generation and release its subscription
    pub fn close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(session) = self.lock_session().take() {
            debug!("Closing session {}", session.generation);
            session.shutdown();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: ?Sized, V> Drop for Replica<B, V> {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.shutdown();
        }
    }
}

fn publish<V>(
    view: &watch::Sender<V>,
    current: &AtomicU64,
    generation: u64,
    f: impl FnOnce(&mut V) -> bool,
) -> bool {
    view.send_if_modified(|v| current.load(Ordering::SeqCst) == generation && f(v))
}

/// Fetch every row of `T` matching `filter`, in presentation order
pub(crate) async fn fetch_rows<B, T>(backend: &B, filter: &Filter) -> SyncResult<Vec<T>>
where
    B: Backend + ?Sized,
    T: Record,
{
    let order = match T::ORDER {
        SortOrder::Ascending => OrderBy::asc("created_at"),
        SortOrder::Descending => OrderBy::desc("created_at"),
    };
    let rows = backend.fetch_many(T::COLLECTION, filter, order).await?;
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(|e| SyncError::from(StoreError::from(e))))
        .collect()
}

/// Apply feed events to the view until the feed ends or the session retires
async fn pump<B, V>(
    backend: Arc<B>,
    view: Arc<watch::Sender<V>>,
    current: Arc<AtomicU64>,
    generation: u64,
    mut subscription: Subscription<V::Row>,
    filter: Filter,
) where
    B: Backend + ?Sized,
    V: View,
{
    while let Some(event) = subscription.next().await {
        if current.load(Ordering::SeqCst) != generation {
            break;
        }

        match event {
            FeedEvent::Resubscribed => {
                info!(
                    "Feed for {} reconnected; re-fetching",
                    <V::Row as Record>::COLLECTION.table()
                );
                match fetch_rows::<B, V::Row>(&backend, &filter).await {
                    Ok(rows) => {
                        publish(&view, &current, generation, |v| {
                            v.rows_mut().reset(rows);
                            true
                        });
                    }
                    Err(e) => warn!("Re-fetch after reconnect failed: {}", e),
                }
            }
            event => {
                let changed = publish(&view, &current, generation, |v| v.rows_mut().apply(event));
                if !changed {
                    debug!("Feed event left the view unchanged");
                }
            }
        }
    }
    debug!("Feed pump for session {} finished", generation);
}
