//! Realtime change-feed connection
//!
//! One websocket per process carries every subscription as its own
//! channel. A background task owns the socket: it heartbeats, reconnects
//! with exponential backoff, and rejoins all channels afterwards. Because
//! the server does not replay changes missed while disconnected, each
//! channel is sent [`FeedMessage::Resubscribed`] once it is live again so
//! its owner can re-fetch.

mod message;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use self::message::{Frame, Incoming};
use super::{ChangeKind, FeedMessage, Filter, RawSubscription, SubscriptionId};
use crate::error::{StoreError, StoreResult};
use crate::models::Collection;

/// Socket connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected; waiting to retry or shut down
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connected, channels joined or joining
    Connected,
}

/// Configuration for the realtime connection
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Realtime endpoint, e.g. `wss://<project>.supabase.co/realtime/v1`
    pub url: String,
    /// Key sent as `apikey` and as the channel access token
    pub api_key: String,
    /// How often to heartbeat
    pub heartbeat_interval: Duration,
    /// Initial reconnect delay
    pub initial_reconnect_delay: Duration,
    /// Maximum reconnect delay
    pub max_reconnect_delay: Duration,
}

impl RealtimeConfig {
    /// Derive the realtime endpoint from the store's HTTP URL
    pub fn for_store(store_url: &str, api_key: &str) -> Self {
        let base = store_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };

        Self {
            url: format!("{}/realtime/v1", base),
            api_key: api_key.to_string(),
            ..Self::default()
        }
    }

    /// Full websocket URL including protocol parameters
    pub fn socket_url(&self) -> String {
        format!(
            "{}/websocket?apikey={}&vsn=1.0.0",
            self.url.trim_end_matches('/'),
            self.api_key
        )
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            heartbeat_interval: Duration::from_secs(25),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

/// What a channel listens to
#[derive(Debug, Clone)]
struct ChannelSpec {
    collection: Collection,
    filter: Filter,
    kinds: Vec<ChangeKind>,
}

/// Commands sent to the socket task
#[derive(Debug)]
enum SocketCommand {
    Join {
        id: SubscriptionId,
        spec: ChannelSpec,
        tx: mpsc::UnboundedSender<FeedMessage>,
    },
    Leave {
        id: SubscriptionId,
    },
    Shutdown,
}

/// A registered channel, joined or waiting for a connection
struct Channel {
    topic: String,
    spec: ChannelSpec,
    tx: mpsc::UnboundedSender<FeedMessage>,
    /// Changes may have been missed since this channel was last live
    needs_resync: bool,
}

/// Handle to the socket task
pub(crate) struct RealtimeSocket {
    command_tx: mpsc::UnboundedSender<SocketCommand>,
    status_rx: watch::Receiver<ConnectionStatus>,
    next_id: AtomicU64,
}

impl RealtimeSocket {
    /// Spawn the socket task. Must be called within a tokio runtime.
    pub fn spawn(config: RealtimeConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        tokio::spawn(socket_loop(config, command_rx, status_tx));

        Self {
            command_tx,
            status_rx,
            next_id: AtomicU64::new(1),
        }
    }

    /// Watch connection status
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Register a channel; it is joined whenever the socket is connected
    pub fn join(
        &self,
        collection: Collection,
        filter: &Filter,
        kinds: &[ChangeKind],
    ) -> StoreResult<RawSubscription> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        let spec = ChannelSpec {
            collection,
            filter: filter.clone(),
            kinds: kinds.to_vec(),
        };

        self.command_tx
            .send(SocketCommand::Join { id, spec, tx })
            .map_err(|_| StoreError::Connection("realtime task has stopped".to_string()))?;

        Ok(RawSubscription { id, messages: rx })
    }

    pub fn leave(&self, id: SubscriptionId) {
        let _ = self.command_tx.send(SocketCommand::Leave { id });
    }
}

impl Drop for RealtimeSocket {
    fn drop(&mut self) {
        let _ = self.command_tx.send(SocketCommand::Shutdown);
    }
}

fn topic_for(id: SubscriptionId, spec: &ChannelSpec) -> String {
    format!("realtime:{}:{}", spec.collection.table(), id.0)
}

/// How a connection ended
enum SessionEnd {
    Shutdown,
    Closed,
}

/// Main socket loop with reconnection
async fn socket_loop(
    config: RealtimeConfig,
    mut command_rx: mpsc::UnboundedReceiver<SocketCommand>,
    status_tx: watch::Sender<ConnectionStatus>,
) {
    let mut channels: HashMap<SubscriptionId, Channel> = HashMap::new();
    let mut reconnect_delay = config.initial_reconnect_delay;

    loop {
        let _ = status_tx.send(ConnectionStatus::Connecting);

        match run_session(&config, &mut channels, &mut command_rx, &status_tx).await {
            Ok(SessionEnd::Shutdown) => break,
            Ok(SessionEnd::Closed) => {
                info!("Realtime connection closed by server");
                reconnect_delay = config.initial_reconnect_delay;
            }
            Err(e) => {
                warn!("Realtime connection error: {:#}", e);
            }
        }

        let _ = status_tx.send(ConnectionStatus::Disconnected);
        for channel in channels.values_mut() {
            channel.needs_resync = true;
        }

        // Wait before reconnecting, still accepting channel changes
        let sleep = tokio::time::sleep(reconnect_delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = command_rx.recv() => match cmd {
                    Some(SocketCommand::Join { id, spec, tx }) => {
                        let topic = topic_for(id, &spec);
                        channels.insert(id, Channel { topic, spec, tx, needs_resync: false });
                    }
                    Some(SocketCommand::Leave { id }) => {
                        channels.remove(&id);
                    }
                    Some(SocketCommand::Shutdown) | None => {
                        let _ = status_tx.send(ConnectionStatus::Disconnected);
                        return;
                    }
                }
            }
        }
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
        debug!("Reconnecting to realtime server");
    }

    let _ = status_tx.send(ConnectionStatus::Disconnected);
}

/// Monotonic message references
#[derive(Default)]
struct Refs(u64);

impl Refs {
    fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}

/// Connect, join every channel, and pump frames until the socket ends
async fn run_session(
    config: &RealtimeConfig,
    channels: &mut HashMap<SubscriptionId, Channel>,
    command_rx: &mut mpsc::UnboundedReceiver<SocketCommand>,
    status_tx: &watch::Sender<ConnectionStatus>,
) -> Result<SessionEnd> {
    let (ws_stream, _) = connect_async(config.socket_url())
        .await
        .context("Failed to connect to realtime server")?;
    let (mut write, mut read) = ws_stream.split();

    let _ = status_tx.send(ConnectionStatus::Connected);
    info!("Connected to realtime server");

    let mut refs = Refs::default();
    // join ref -> channel awaiting its reply
    let mut pending_joins: HashMap<String, SubscriptionId> = HashMap::new();

    for (id, channel) in channels.iter() {
        let reference = refs.next();
        let frame = join_frame(channel, &config.api_key, reference.clone());
        write.send(Message::Text(frame.encode()?)).await?;
        pending_joins.insert(reference, *id);
    }

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let frame = Frame::heartbeat(refs.next());
                write.send(Message::Text(frame.encode()?)).await?;
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(SocketCommand::Join { id, spec, tx }) => {
                        let topic = topic_for(id, &spec);
                        let channel = Channel { topic, spec, tx, needs_resync: false };
                        let reference = refs.next();
                        let frame = join_frame(&channel, &config.api_key, reference.clone());
                        write.send(Message::Text(frame.encode()?)).await?;
                        pending_joins.insert(reference, id);
                        channels.insert(id, channel);
                    }
                    Some(SocketCommand::Leave { id }) => {
                        if let Some(channel) = channels.remove(&id) {
                            let frame = Frame::leave(&channel.topic, refs.next());
                            write.send(Message::Text(frame.encode()?)).await?;
                            debug!("Left {}", channel.topic);
                        }
                    }
                    Some(SocketCommand::Shutdown) | None => {
                        write.close().await.ok();
                        return Ok(SessionEnd::Shutdown);
                    }
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let frame = match Frame::decode(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!("Undecodable realtime frame: {}", e);
                                continue;
                            }
                        };
                        let gone = route_frame(frame, channels, &mut pending_joins);
                        for id in gone {
                            if let Some(channel) = channels.remove(&id) {
                                let frame = Frame::leave(&channel.topic, refs.next());
                                write.send(Message::Text(frame.encode()?)).await?;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                    Some(Err(e)) => return Err(e.into()),
                    _ => {}
                }
            }
        }
    }
}

fn join_frame(channel: &Channel, access_token: &str, reference: String) -> Frame {
    Frame::join(
        &channel.topic,
        channel.spec.collection.table(),
        &channel.spec.filter,
        &channel.spec.kinds,
        access_token,
        reference,
    )
}

/// Deliver one incoming frame; returns channels whose listener has gone away
fn route_frame(
    frame: Frame,
    channels: &mut HashMap<SubscriptionId, Channel>,
    pending_joins: &mut HashMap<String, SubscriptionId>,
) -> Vec<SubscriptionId> {
    let mut gone = Vec::new();

    match frame.classify() {
        Incoming::Reply {
            topic,
            reference,
            ok,
            response,
        } => {
            let Some(id) = reference.and_then(|r| pending_joins.remove(&r)) else {
                return gone;
            };
            let Some(channel) = channels.get_mut(&id) else {
                return gone;
            };
            if !ok {
                warn!("Join rejected for {}: {}", topic, response);
                return gone;
            }
            debug!("Joined {}", topic);
            if channel.needs_resync {
                channel.needs_resync = false;
                if channel.tx.send(FeedMessage::Resubscribed).is_err() {
                    gone.push(id);
                }
            }
        }
        Incoming::Change { topic, change } => {
            for (id, channel) in channels.iter() {
                if channel.topic == topic
                    && channel.tx.send(FeedMessage::Change(change.clone())).is_err()
                {
                    gone.push(*id);
                }
            }
        }
        Incoming::ChannelError { topic } => {
            warn!("Realtime channel error on {}", topic);
        }
        Incoming::ChannelClosed { topic } => {
            debug!("Realtime channel closed: {}", topic);
        }
        Incoming::Other { .. } => {}
    }

    gone
}
