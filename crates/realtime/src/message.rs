use serde::{Deserialize, Serialize};
use std::ops::BitOr;

/// Represents a full message received or sent over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub event: ChannelEvent,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    pub message_ref: serde_json::Value, // Can be string or null
}

/// チャンネルイベント (Phoenix/Realtime protocol events)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelEvent {
    PostgresChanges,

    #[serde(rename = "phx_join")]
    PhoenixJoin,
    #[serde(rename = "phx_leave")]
    PhoenixLeave,
    #[serde(rename = "phx_reply")]
    PhoenixReply,
    #[serde(rename = "phx_error")]
    PhoenixError,
    #[serde(rename = "phx_close")]
    PhoenixClose,

    Heartbeat,
    System,

    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PostgresChanges => "postgres_changes",
            Self::PhoenixJoin => "phx_join",
            Self::PhoenixLeave => "phx_leave",
            Self::PhoenixReply => "phx_reply",
            Self::PhoenixError => "phx_error",
            Self::PhoenixClose => "phx_close",
            Self::Heartbeat => "heartbeat",
            Self::System => "system",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Kind of committed row change reported by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

/// Set of change kinds a binding listens to.
///
/// Combine with `|`: `EventMask::INSERT | EventMask::UPDATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask {
    insert: bool,
    update: bool,
    delete: bool,
}

impl EventMask {
    pub const INSERT: EventMask = EventMask {
        insert: true,
        update: false,
        delete: false,
    };
    pub const UPDATE: EventMask = EventMask {
        insert: false,
        update: true,
        delete: false,
    };
    pub const DELETE: EventMask = EventMask {
        insert: false,
        update: false,
        delete: true,
    };
    pub const ALL: EventMask = EventMask {
        insert: true,
        update: true,
        delete: true,
    };

    pub fn contains(&self, kind: ChangeKind) -> bool {
        match kind {
            ChangeKind::Insert => self.insert,
            ChangeKind::Update => self.update,
            ChangeKind::Delete => self.delete,
        }
    }

    pub fn is_all(&self) -> bool {
        *self == Self::ALL
    }

    /// Event names as the server expects them in a `postgres_changes` config.
    pub(crate) fn wire_events(&self) -> Vec<&'static str> {
        if self.is_all() {
            return vec!["*"];
        }
        [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]
            .into_iter()
            .filter(|kind| self.contains(*kind))
            .map(|kind| kind.as_str())
            .collect()
    }
}

impl Default for EventMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        EventMask {
            insert: self.insert || rhs.insert,
            update: self.update || rhs.update,
            delete: self.delete || rhs.delete,
        }
    }
}

/// Why a change callback fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCause {
    /// A committed row change matching the binding's mask.
    Row(ChangeKind),
    /// Change kind missing from the server payload; treated as a row change.
    Unspecified,
    /// The connection was re-established; changes may have been missed while offline.
    Resync,
}

/// Invalidation signal handed to change callbacks.
///
/// Carries no row data on purpose: receivers re-read the table instead of
/// merging whatever the event happened to contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub table: String,
    pub cause: ChangeCause,
}

/// Table and change kind extracted from a `postgres_changes` payload.
pub(crate) fn parse_change(payload: &serde_json::Value) -> (Option<String>, Option<ChangeKind>) {
    let data = payload.get("data").unwrap_or(payload);
    let table = data
        .get("table")
        .and_then(|v| v.as_str())
        .map(String::from);
    let kind = data
        .get("type")
        .or_else(|| data.get("eventType"))
        .and_then(|v| v.as_str())
        .and_then(ChangeKind::parse);
    (table, kind)
}
