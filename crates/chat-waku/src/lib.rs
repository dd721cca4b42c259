//! Transport side of the chat engine: the pub/sub boundary, subscription
//! liveness, the per-session context and the command/event runtime.

/// Persisted local identity.
pub mod identity;
/// Subscription keep-alive task.
pub mod liveness;
/// In-process relay network.
pub mod memory;
/// Command/event loop owning a session.
pub mod runtime;
/// Per-session room, timeline and backfill orchestration.
pub mod session;
/// Pub/sub service boundary and the adapter in front of it.
pub mod transport;

pub use identity::{DISPLAY_NAME_KEY, IdentityManager, PARTICIPANT_ID_KEY};
pub use liveness::{LivenessMonitor, LivenessCheck, PING_INTERVAL, check_once};
pub use memory::InMemoryRelay;
pub use runtime::{ChatRuntimeHandle, EventStream, RuntimeError, spawn_runtime};
pub use session::{ChatSession, FetchedPage, PageApplied, PageFold, SessionInbox, fold_page};
pub use transport::{
    FrameSink, FrameStream, HistoryQuery, PageDirection, PubSubService, SubscriptionId,
    TimeFilter, TransportAdapter,
};
