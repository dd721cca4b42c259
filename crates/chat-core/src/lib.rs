//! Core of the decentralized chat sync engine.
//!
//! This crate holds everything that does not touch the network: the
//! command/event types, the session lifecycle, the versioned wire schema,
//! the ordered timeline and the backfill state machine.

/// Cursor-paginated history backfill controller.
pub mod backfill;
/// Stable error types shared by all crates.
pub mod error;
/// Identity naming helpers (topics, private rooms, generated names).
pub mod identity;
/// Event normalization helpers (send acknowledgements, errors).
pub mod normalization;
/// Versioned wire schema registry and room codec.
pub mod schema;
/// Session lifecycle state machine.
pub mod state_machine;
/// Ordered, deduplicated message store.
pub mod timeline;
/// UI-facing protocol and data types.
pub mod types;

pub use backfill::{
    BackfillConfig, BackfillController, BackfillState, FetchDecision, HistoryRequest, PageOutcome,
    PageSummary, SkipReason,
};
pub use error::{ChatError, ChatErrorCategory, DecodeError, TransportError, TransportErrorKind};
pub use identity::{content_topic, generate_display_name, private_room_name};
pub use normalization::{SendOutcome, normalize_error, normalize_send_outcome};
pub use schema::{LATEST_VERSION, RoomCodec};
pub use state_machine::SessionStateMachine;
pub use timeline::{MergeOutcome, TimelineStore};
pub use types::{
    ChatCommand, ChatEvent, ChatOptions, Frame, Message, MessageKind, Participant, SendAck,
    SessionStatus,
};
