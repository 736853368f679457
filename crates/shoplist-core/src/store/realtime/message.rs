//! Realtime protocol frames
//!
//! Phoenix channel frames (JSON, serializer v1.0.0) exchanged with the
//! realtime server. Row payloads are passed through untouched; typing them
//! is the change-feed client's job.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::store::{ChangeKind, Filter, RawChange};

/// Topic used for socket-level heartbeats
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Database schema the tables live in
pub const SCHEMA: &str = "public";

mod events {
    pub const JOIN: &str = "phx_join";
    pub const LEAVE: &str = "phx_leave";
    pub const REPLY: &str = "phx_reply";
    pub const ERROR: &str = "phx_error";
    pub const CLOSE: &str = "phx_close";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const POSTGRES_CHANGES: &str = "postgres_changes";
}

/// A single frame on the socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    /// Join a channel listening for row changes on one table
    pub fn join(
        topic: &str,
        table: &str,
        filter: &Filter,
        kinds: &[ChangeKind],
        access_token: &str,
        reference: String,
    ) -> Self {
        let changes: Vec<Value> = kinds
            .iter()
            .map(|kind| {
                let mut change = json!({
                    "event": kind.as_str(),
                    "schema": SCHEMA,
                    "table": table,
                });
                // Delete payloads carry only the primary key, so a column
                // filter would never match them
                if *kind != ChangeKind::Delete {
                    change["filter"] = Value::String(filter.to_string());
                }
                change
            })
            .collect();

        Frame {
            topic: topic.to_string(),
            event: events::JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": changes,
                },
                "access_token": access_token,
            }),
            reference: Some(reference),
        }
    }

    /// Leave a channel
    pub fn leave(topic: &str, reference: String) -> Self {
        Frame {
            topic: topic.to_string(),
            event: events::LEAVE.to_string(),
            payload: json!({}),
            reference: Some(reference),
        }
    }

    /// Keep the socket alive
    pub fn heartbeat(reference: String) -> Self {
        Frame {
            topic: PHOENIX_TOPIC.to_string(),
            event: events::HEARTBEAT.to_string(),
            payload: json!({}),
            reference: Some(reference),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Interpret an incoming frame
    pub fn classify(self) -> Incoming {
        match self.event.as_str() {
            events::REPLY => {
                let ok = self.payload.get("status").and_then(Value::as_str) == Some("ok");
                Incoming::Reply {
                    topic: self.topic,
                    reference: self.reference,
                    ok,
                    response: self.payload.get("response").cloned().unwrap_or(Value::Null),
                }
            }
            events::POSTGRES_CHANGES => match parse_change(&self.payload) {
                Some(change) => Incoming::Change {
                    topic: self.topic,
                    change,
                },
                None => Incoming::Other {
                    topic: self.topic,
                    event: self.event,
                },
            },
            events::ERROR => Incoming::ChannelError { topic: self.topic },
            events::CLOSE => Incoming::ChannelClosed { topic: self.topic },
            _ => Incoming::Other {
                topic: self.topic,
                event: self.event,
            },
        }
    }
}

/// What an incoming frame means to the socket task
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Reply to a frame we sent (join, leave, heartbeat)
    Reply {
        topic: String,
        reference: Option<String>,
        ok: bool,
        response: Value,
    },
    /// A row change on a joined channel
    Change { topic: String, change: RawChange },
    /// The server reported a channel error
    ChannelError { topic: String },
    /// The server closed a channel
    ChannelClosed { topic: String },
    /// Presence, system messages, and anything we do not act on
    Other { topic: String, event: String },
}

/// Pull the row change out of a `postgres_changes` payload
///
/// Only the change type is required here; missing rows are left as `None`
/// for the change-feed client to reject.
fn parse_change(payload: &Value) -> Option<RawChange> {
    let data = payload.get("data")?;
    let kind = ChangeKind::parse(data.get("type")?.as_str()?)?;
    let non_null = |key: &str| data.get(key).filter(|v| !v.is_null()).cloned();
    Some(RawChange {
        kind,
        record: non_null("record"),
        old_record: non_null("old_record"),
    })
}
