//! Versioned wire schemas for chat payloads.
//!
//! Payloads are protobuf records whose field layout changed between versions
//! without a reliable version header. Decoding tries the newest layout first
//! and falls back to older ones; the first layout that parses wins and the
//! result is upgraded step by step to [`LATEST_VERSION`].

use prost::Message as _;
use tracing::trace;

use crate::{
    error::DecodeError,
    identity::content_topic,
    types::{DEFAULT_PARTICIPANT_KIND, Frame, Message, MessageKind, Participant},
};

/// Newest schema version known to this build.
pub const LATEST_VERSION: u32 = 2;

mod wire {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ParticipantV0 {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(string, tag = "2")]
        pub name: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ParticipantV2 {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(string, tag = "2")]
        pub name: String,
        #[prost(string, tag = "3")]
        pub kind: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ChatMessageV0 {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(message, optional, tag = "2")]
        pub author: Option<ParticipantV0>,
        #[prost(string, tag = "3")]
        pub kind: String,
        #[prost(uint64, tag = "4")]
        pub timestamp: u64,
        #[prost(string, tag = "6")]
        pub data: String,
        #[prost(string, tag = "7")]
        pub room: String,
        #[prost(uint64, optional, tag = "8")]
        pub version: Option<u64>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ChatMessageV1 {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(uint64, optional, tag = "2")]
        pub version: Option<u64>,
        #[prost(message, optional, tag = "3")]
        pub author: Option<ParticipantV0>,
        #[prost(string, tag = "4")]
        pub kind: String,
        #[prost(uint64, tag = "5")]
        pub timestamp: u64,
        #[prost(string, tag = "6")]
        pub data: String,
        #[prost(string, tag = "7")]
        pub room: String,
        #[prost(string, optional, tag = "8")]
        pub response_to: Option<String>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ChatMessageV2 {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(uint64, optional, tag = "2")]
        pub version: Option<u64>,
        #[prost(message, optional, tag = "3")]
        pub author: Option<ParticipantV2>,
        #[prost(string, tag = "4")]
        pub kind: String,
        #[prost(uint64, tag = "5")]
        pub timestamp: u64,
        #[prost(string, tag = "6")]
        pub data: String,
        #[prost(string, tag = "7")]
        pub room: String,
        #[prost(string, optional, tag = "8")]
        pub response_to: Option<String>,
    }
}

enum LayoutError {
    Structural(prost::DecodeError),
    MissingAuthor,
}

impl From<prost::DecodeError> for LayoutError {
    fn from(err: prost::DecodeError) -> Self {
        Self::Structural(err)
    }
}

struct SchemaDefinition {
    version: u32,
    decode: fn(&[u8]) -> Result<Message, LayoutError>,
}

/// Layouts ordered oldest to newest; index equals version.
static SCHEMAS: [SchemaDefinition; 3] = [
    SchemaDefinition {
        version: 0,
        decode: decode_v0,
    },
    SchemaDefinition {
        version: 1,
        decode: decode_v1,
    },
    SchemaDefinition {
        version: 2,
        decode: decode_v2,
    },
];

type UpgradeStep = fn(Message) -> Message;

/// Upgrade steps indexed by the version they upgrade from.
static UPGRADES: [UpgradeStep; LATEST_VERSION as usize] = [upgrade_v0_to_v1, upgrade_v1_to_v2];

/// Decode a payload of any known version and upgrade it to the latest shape.
pub fn decode_latest(bytes: &[u8]) -> Result<Message, DecodeError> {
    let mut last_error = None;

    for schema in SCHEMAS.iter().rev() {
        match (schema.decode)(bytes) {
            Ok(message) => return Ok(upgrade_to_latest(message)),
            Err(LayoutError::MissingAuthor) => {
                return Err(DecodeError::MissingAuthor {
                    version: schema.version,
                });
            }
            Err(LayoutError::Structural(err)) => {
                trace!(version = schema.version, error = %err, "payload does not fit layout");
                last_error = Some(err.to_string());
            }
        }
    }

    Err(DecodeError::Malformed {
        reason: last_error.unwrap_or_else(|| "no schema registered".to_owned()),
    })
}

/// Encode a message using the latest layout.
pub fn encode(message: &Message) -> Vec<u8> {
    encode_v2(message)
}

/// Encode a message using an older layout for peers that only read it.
///
/// Returns `None` when no layout exists for `version`.
pub fn encode_as(message: &Message, version: u32) -> Option<Vec<u8>> {
    match version {
        0 => Some(encode_v0(message)),
        1 => Some(encode_v1(message)),
        2 => Some(encode_v2(message)),
        _ => None,
    }
}

/// Apply one upgrade step. Messages already at the latest version are returned unchanged.
pub fn upgrade(message: Message) -> Message {
    match UPGRADES.get(message.version as usize) {
        Some(step) => step(message),
        None => message,
    }
}

fn upgrade_to_latest(mut message: Message) -> Message {
    while message.version < LATEST_VERSION {
        message = upgrade(message);
    }
    message
}

fn upgrade_v0_to_v1(mut message: Message) -> Message {
    message.response_to = None;
    message.version = 1;
    message
}

fn upgrade_v1_to_v2(mut message: Message) -> Message {
    message.author.kind = DEFAULT_PARTICIPANT_KIND.to_owned();
    message.version = 2;
    message
}

fn wire_version(explicit: Option<u64>, layout_default: u32) -> u32 {
    explicit
        .map(|value| u32::try_from(value).unwrap_or(u32::MAX))
        .unwrap_or(layout_default)
        .min(LATEST_VERSION)
}

fn decode_v0(bytes: &[u8]) -> Result<Message, LayoutError> {
    let raw = wire::ChatMessageV0::decode(bytes)?;
    let author = raw.author.ok_or(LayoutError::MissingAuthor)?;
    Ok(Message {
        id: raw.id,
        author: Participant {
            id: author.id,
            name: author.name,
            kind: String::new(),
        },
        room: raw.room,
        kind: MessageKind::from_wire(&raw.kind),
        data: raw.data,
        timestamp: raw.timestamp,
        response_to: None,
        version: wire_version(raw.version, 0),
    })
}

fn decode_v1(bytes: &[u8]) -> Result<Message, LayoutError> {
    let raw = wire::ChatMessageV1::decode(bytes)?;
    let author = raw.author.ok_or(LayoutError::MissingAuthor)?;
    Ok(Message {
        id: raw.id,
        author: Participant {
            id: author.id,
            name: author.name,
            kind: String::new(),
        },
        room: raw.room,
        kind: MessageKind::from_wire(&raw.kind),
        data: raw.data,
        timestamp: raw.timestamp,
        response_to: raw.response_to,
        version: wire_version(raw.version, 1),
    })
}

fn decode_v2(bytes: &[u8]) -> Result<Message, LayoutError> {
    let raw = wire::ChatMessageV2::decode(bytes)?;
    let author = raw.author.ok_or(LayoutError::MissingAuthor)?;
    Ok(Message {
        id: raw.id,
        author: Participant {
            id: author.id,
            name: author.name,
            kind: author.kind,
        },
        room: raw.room,
        kind: MessageKind::from_wire(&raw.kind),
        data: raw.data,
        timestamp: raw.timestamp,
        response_to: raw.response_to,
        // Latest encoders always write the version; a missing one means a v1 sender.
        version: wire_version(raw.version, 1),
    })
}

fn encode_v0(message: &Message) -> Vec<u8> {
    wire::ChatMessageV0 {
        id: message.id.clone(),
        author: Some(wire::ParticipantV0 {
            id: message.author.id.clone(),
            name: message.author.name.clone(),
        }),
        kind: message.kind.as_str().to_owned(),
        timestamp: message.timestamp,
        data: message.data.clone(),
        room: message.room.clone(),
        version: Some(0),
    }
    .encode_to_vec()
}

fn encode_v1(message: &Message) -> Vec<u8> {
    wire::ChatMessageV1 {
        id: message.id.clone(),
        version: Some(1),
        author: Some(wire::ParticipantV0 {
            id: message.author.id.clone(),
            name: message.author.name.clone(),
        }),
        kind: message.kind.as_str().to_owned(),
        timestamp: message.timestamp,
        data: message.data.clone(),
        room: message.room.clone(),
        response_to: message.response_to.clone(),
    }
    .encode_to_vec()
}

fn encode_v2(message: &Message) -> Vec<u8> {
    wire::ChatMessageV2 {
        id: message.id.clone(),
        version: Some(u64::from(LATEST_VERSION)),
        author: Some(wire::ParticipantV2 {
            id: message.author.id.clone(),
            name: message.author.name.clone(),
            kind: message.author.kind.clone(),
        }),
        kind: message.kind.as_str().to_owned(),
        timestamp: message.timestamp,
        data: message.data.clone(),
        room: message.room.clone(),
        response_to: message.response_to.clone(),
    }
    .encode_to_vec()
}

/// Encoder/decoder pair bound to one room's content topic.
///
/// A new codec is built on every room change so frames for the previous
/// room can never be encoded or accepted afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomCodec {
    room: String,
    topic: String,
}

impl RoomCodec {
    pub fn new(channel: &str, room: &str) -> Self {
        Self {
            room: room.to_owned(),
            topic: content_topic(channel, room),
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn encode(&self, message: &Message) -> Frame {
        Frame {
            topic: self.topic.clone(),
            payload: encode(message),
            timestamp_ms: Some(message.timestamp),
        }
    }

    pub fn decode(&self, frame: &Frame) -> Result<Message, DecodeError> {
        if frame.topic != self.topic {
            return Err(DecodeError::TopicMismatch {
                expected: self.topic.clone(),
                actual: frame.topic.clone(),
            });
        }
        decode_latest(&frame.payload)
    }
}
