use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Participant kind assigned to authors of payloads that predate the field.
pub const DEFAULT_PARTICIPANT_KIND: &str = "user";

/// Channel used when the host application does not configure one.
pub const DEFAULT_CHANNEL_NAME: &str = "my-app";

/// Room joined when the host application does not configure any.
pub const DEFAULT_ROOM: &str = "General";

/// Connection status reported to the UI layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// Session object exists but `Connect` was never issued.
    #[default]
    Idle,
    /// Transport start and identity resolution are running.
    Connecting,
    /// Subscribed to a room and able to send.
    Connected,
    /// Torn down explicitly or setup failed.
    Disconnected,
}

/// A chat participant as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Participant {
    /// Stable identity, derived from the transport peer id or persisted locally.
    pub id: String,
    /// Locally editable display name.
    pub name: String,
    /// Optional role/category tag.
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: DEFAULT_PARTICIPANT_KIND.to_owned(),
        }
    }
}

/// Message category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Reaction,
    System,
    Other,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Reaction => "reaction",
            Self::System => "system",
            Self::Other => "other",
        }
    }

    /// Map a wire string to a kind; unknown values become `Other`.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "text" => Self::Text,
            "reaction" => Self::Reaction,
            "system" => Self::System,
            _ => Self::Other,
        }
    }
}

/// A decoded chat message, always at the latest schema version once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// `sender id + send timestamp`, unique per sender-timestamp pair.
    pub id: String,
    /// Author snapshot at send time.
    pub author: Participant,
    /// Room name as typed by the sender.
    pub room: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Free-form payload content.
    pub data: String,
    /// Send time in milliseconds since Unix epoch.
    pub timestamp: u64,
    /// Id of the message this one replies to.
    pub response_to: Option<String>,
    /// Schema version tag.
    pub version: u32,
}

impl Message {
    /// Deterministic message id for a sender and send timestamp.
    pub fn compose_id(sender_id: &str, timestamp: u64) -> String {
        format!("{sender_id}{timestamp}")
    }

    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }
}

/// Raw transport frame, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Content topic the frame was published on.
    pub topic: String,
    /// Encoded wire payload.
    pub payload: Vec<u8>,
    /// Transport-level timestamp in milliseconds, when known.
    pub timestamp_ms: Option<u64>,
}

/// Host-supplied options consumed by the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChatOptions {
    /// Channel name used as the first content topic segment.
    pub channel_name: String,
    /// Bootstrap peers forwarded to the transport.
    pub peers: Vec<String>,
    /// Rooms offered to the user; the first one is joined on connect.
    pub rooms: Vec<String>,
    /// Whether two-party rooms may be opened.
    pub allow_private_chat: bool,
    /// Page size of the first backfill after entering a room.
    pub initial_fetch_limit: u32,
    /// Page size of each incremental backfill.
    pub fetch_limit: u32,
    /// Stop backfilling once the timeline holds this many messages.
    pub max_messages: Option<usize>,
    /// Only fetch messages younger than this on the first page.
    pub message_age_window_ms: Option<u64>,
    /// Consecutive low-yield pages tolerated before pausing.
    pub max_fetch_attempts: u32,
    /// Pause length after too many low-yield pages.
    pub fetch_pause_ms: u64,
    /// Backfill is driven by the UI scrolling; requires a cursor.
    pub fetch_on_scroll: bool,
    /// Include system messages in the UI feed.
    pub show_system_messages: bool,
    /// Whether the user may override the generated display name.
    pub allow_rename: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_CHANNEL_NAME.to_owned(),
            peers: Vec::new(),
            rooms: Vec::new(),
            allow_private_chat: true,
            initial_fetch_limit: 30,
            fetch_limit: 10,
            max_messages: None,
            message_age_window_ms: None,
            max_fetch_attempts: 3,
            fetch_pause_ms: 15_000,
            fetch_on_scroll: true,
            show_system_messages: false,
            allow_rename: true,
        }
    }
}

impl ChatOptions {
    /// Configured rooms, falling back to a single default room.
    pub fn rooms_or_default(&self) -> Vec<String> {
        if self.rooms.is_empty() {
            vec![DEFAULT_ROOM.to_owned()]
        } else {
            self.rooms.clone()
        }
    }

    pub fn message_age_window(&self) -> Option<Duration> {
        self.message_age_window_ms.map(Duration::from_millis)
    }

    pub fn fetch_pause(&self) -> Duration {
        Duration::from_millis(self.fetch_pause_ms)
    }
}

/// Commands pushed by the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatCommand {
    /// Start the transport, resolve identity and join the first room.
    Connect,
    /// Switch to a named room.
    EnterRoom { room: String },
    /// Switch to the two-party room shared with another participant.
    EnterPrivateRoom { participant_id: String },
    /// Compose and publish a message in the current room.
    SendMessage {
        /// UI-provided transaction id echoed in `SendAck`.
        client_txn_id: String,
        data: String,
        kind: MessageKind,
        response_to: Option<String>,
    },
    /// Request one more page of history.
    LoadMore,
    /// Override the local display name.
    SetDisplayName { name: String },
    /// Tear down the room subscription and stop.
    Disconnect,
}

/// Acknowledgement for `SendMessage`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendAck {
    /// Original UI transaction id.
    pub client_txn_id: String,
    /// Message id on success.
    pub message_id: Option<String>,
    /// Stable error code on failure.
    pub error_code: Option<String>,
}

/// Events emitted to the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatEvent {
    StatusChanged {
        status: SessionStatus,
    },
    RoomChanged {
        room: String,
        topic: String,
    },
    /// Full feed replacement for the current room, newest first.
    TimelineUpdated {
        room: String,
        messages: Vec<Message>,
        participants: Vec<Participant>,
    },
    SendAck(SendAck),
    /// Backfill stopped after repeated low-yield pages.
    BackfillPaused {
        retry_after_ms: u64,
    },
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
}
