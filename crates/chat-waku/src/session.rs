//! Explicit per-session context: one room at a time, one backfill in flight.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use chat_core::{
    BackfillConfig, BackfillController, ChatError, ChatErrorCategory, ChatOptions, FetchDecision,
    Frame, HistoryRequest, LATEST_VERSION, Message, MessageKind, PageOutcome, PageSummary,
    Participant, RoomCodec, SessionStateMachine, SessionStatus, SkipReason, TimelineStore,
    TransportError, private_room_name,
};
use chat_platform::KeyValueStore;
use tokio::{sync::mpsc, time::Instant};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::{
    identity::IdentityManager,
    liveness::{LivenessMonitor, PING_INTERVAL},
    transport::{FrameSink, FrameStream, PubSubService, TransportAdapter},
};

/// Decoded result of one history query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageFold {
    pub messages: Vec<Message>,
    pub frames: usize,
    pub decode_failures: usize,
}

/// A finished history query posted back to the session owner.
#[derive(Debug)]
pub struct FetchedPage {
    pub generation: u64,
    pub result: Result<PageFold, TransportError>,
}

/// Channels the session owner must drain: live frames and finished pages.
pub struct SessionInbox {
    pub live: mpsc::UnboundedReceiver<Frame>,
    pub pages: mpsc::UnboundedReceiver<FetchedPage>,
}

/// What applying a page did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageApplied {
    pub summary: PageSummary,
    /// Whether the timeline gained at least one message.
    pub changed: bool,
}

pub struct ChatSession<S: PubSubService, K: KeyValueStore> {
    options: ChatOptions,
    adapter: Arc<TransportAdapter<S>>,
    identity: IdentityManager<K>,
    state: SessionStateMachine,
    local: Option<Participant>,
    codec: Option<RoomCodec>,
    timeline: TimelineStore,
    backfill: BackfillController,
    liveness: Option<LivenessMonitor>,
    live_tx: FrameSink,
    page_tx: mpsc::UnboundedSender<FetchedPage>,
    last_sent_ts: u64,
}

impl<S: PubSubService, K: KeyValueStore> ChatSession<S, K> {
    pub fn new(service: Arc<S>, store: K, options: ChatOptions) -> (Self, SessionInbox) {
        let (live_tx, live) = mpsc::unbounded_channel();
        let (page_tx, pages) = mpsc::unbounded_channel();
        let identity = IdentityManager::new(store, options.channel_name.clone());
        let backfill = BackfillController::new(BackfillConfig::from_options(&options));

        let session = Self {
            options,
            adapter: Arc::new(TransportAdapter::new(service)),
            identity,
            state: SessionStateMachine::default(),
            local: None,
            codec: None,
            timeline: TimelineStore::default(),
            backfill,
            liveness: None,
            live_tx,
            page_tx,
            last_sent_ts: 0,
        };
        (session, SessionInbox { live, pages })
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    pub fn local_participant(&self) -> Option<&Participant> {
        self.local.as_ref()
    }

    pub fn room(&self) -> Option<&str> {
        self.codec.as_ref().map(RoomCodec::room)
    }

    pub fn topic(&self) -> Option<&str> {
        self.codec.as_ref().map(RoomCodec::topic)
    }

    pub fn timeline(&self) -> &TimelineStore {
        &self.timeline
    }

    pub fn backfill(&self) -> &BackfillController {
        &self.backfill
    }

    /// UI view of the current room, honoring `show_system_messages`.
    pub fn feed(&self) -> Vec<Message> {
        self.timeline.feed(self.options.show_system_messages)
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.timeline.participants()
    }

    /// Start the node, resolve the local identity and join the first room.
    ///
    /// A failed setup leaves the session `Disconnected`.
    pub async fn connect(&mut self) -> Result<(), ChatError> {
        self.state.apply(&chat_core::ChatCommand::Connect)?;

        let result = self.setup().await;
        if let Err(err) = &result {
            warn!(error = %err, "session setup failed");
            self.teardown().await;
        }
        self.state.on_connect_result(result.is_ok())?;
        result
    }

    async fn setup(&mut self) -> Result<(), ChatError> {
        let rooms = self.options.rooms_or_default();
        let first_room = rooms
            .first()
            .map(|room| room.trim().to_owned())
            .filter(|room| !room.is_empty())
            .ok_or_else(|| {
                ChatError::new(ChatErrorCategory::Config, "no_rooms", "no room configured")
            })?;

        self.adapter.start(&self.options.peers).await?;
        let local = self.identity.resolve_participant(self.adapter.service().as_ref())?;
        info!(participant_id = %local.id, name = %local.name, "local identity resolved");
        self.timeline.set_local_participant(local.clone());
        self.local = Some(local);

        self.open_room(&first_room).await?;
        self.liveness = Some(LivenessMonitor::spawn(
            Arc::clone(&self.adapter),
            PING_INTERVAL,
        ));
        Ok(())
    }

    /// Switch to `room`, dropping the old room's timeline and in-flight page.
    pub async fn enter_room(&mut self, room: &str) -> Result<(), ChatError> {
        self.state.require_connected("enter_room")?;
        let room = room.trim();
        if room.is_empty() {
            return Err(ChatError::new(
                ChatErrorCategory::Config,
                "invalid_room",
                "room name must not be empty",
            ));
        }
        self.open_room(room).await
    }

    /// Switch to the two-party room shared with `participant_id`.
    pub async fn enter_private_room(&mut self, participant_id: &str) -> Result<(), ChatError> {
        self.state.require_connected("enter_private_room")?;
        if !self.options.allow_private_chat {
            return Err(ChatError::new(
                ChatErrorCategory::Config,
                "private_chat_disabled",
                "private rooms are disabled",
            ));
        }
        let local_id = self.require_local()?.id.clone();
        let room = private_room_name(&local_id, participant_id.trim());
        self.enter_room(&room).await
    }

    async fn open_room(&mut self, room: &str) -> Result<(), ChatError> {
        self.backfill.reset();
        self.timeline.reset(room);
        self.codec = None;
        let codec = RoomCodec::new(&self.options.channel_name, room);

        self.adapter
            .open_subscription(codec.topic(), self.live_tx.clone())
            .await?;
        info!(
            room = codec.room(),
            topic = codec.topic(),
            generation = self.backfill.generation(),
            "entered room"
        );
        self.codec = Some(codec);

        if let Some(request) = self.backfill.begin_initial(unix_millis()) {
            self.spawn_query(request);
        }
        Ok(())
    }

    /// Decode and merge a live frame. Returns whether the timeline changed.
    pub fn ingest_live(&mut self, frame: Frame) -> bool {
        let Some(codec) = &self.codec else {
            return false;
        };
        match codec.decode(&frame) {
            Ok(message) => self.timeline.merge(message).inserted,
            Err(err) => {
                debug!(topic = %frame.topic, error = %err, "dropping live frame");
                false
            }
        }
    }

    /// Ask the backfill controller for a page and query it in the background.
    ///
    /// The result arrives on [`SessionInbox::pages`] and must be handed to
    /// [`ChatSession::apply_page`].
    pub fn try_fetch(&mut self) -> FetchDecision {
        if self.state.status() != SessionStatus::Connected || self.codec.is_none() {
            return FetchDecision::Skip(SkipReason::NoCursor);
        }

        let decision = self
            .backfill
            .begin(&self.timeline, Instant::now(), unix_millis());
        if let FetchDecision::Fetch(request) = decision {
            self.spawn_query(request);
        }
        decision
    }

    fn spawn_query(&self, request: HistoryRequest) {
        let Some(codec) = self.codec.clone() else {
            return;
        };
        let adapter = Arc::clone(&self.adapter);
        let page_tx = self.page_tx.clone();

        tokio::spawn(async move {
            let result = match adapter.query_historical(codec.topic(), &request).await {
                Ok(stream) => Ok(fold_page(stream, &codec).await),
                Err(err) => Err(err),
            };
            let _ = page_tx.send(FetchedPage {
                generation: request.generation,
                result,
            });
        });
    }

    /// Merge a finished page through the same path as live frames.
    pub fn apply_page(&mut self, page: FetchedPage) -> PageApplied {
        let now = Instant::now();
        let now_ms = unix_millis();

        if page.generation != self.backfill.generation() {
            let summary =
                self.backfill
                    .finish(page.generation, PageOutcome::Accepted(0), &self.timeline, now, now_ms);
            return PageApplied {
                summary,
                changed: false,
            };
        }

        let (outcome, changed) = match page.result {
            Ok(fold) => {
                let mut accepted = 0;
                let mut changed = false;
                for message in fold.messages {
                    let is_system = message.is_system();
                    if self.timeline.merge(message).inserted {
                        changed = true;
                        if !is_system {
                            accepted += 1;
                        }
                    }
                }
                if fold.decode_failures > 0 {
                    debug!(
                        frames = fold.frames,
                        decode_failures = fold.decode_failures,
                        "history page contained undecodable frames"
                    );
                }
                (PageOutcome::Accepted(accepted), changed)
            }
            Err(err) => {
                warn!(error = %err, "history query failed");
                (PageOutcome::Failed(err), false)
            }
        };

        let summary = self
            .backfill
            .finish(page.generation, outcome, &self.timeline, now, now_ms);
        if let PageSummary::CursorRecovered { cursor } = summary {
            self.timeline.rewind_cursor(cursor);
        }
        PageApplied { summary, changed }
    }

    /// Wait for the next finished page and apply it.
    pub async fn fetch_page(&mut self, inbox: &mut SessionInbox) -> Option<PageApplied> {
        let page = inbox.pages.recv().await?;
        Some(self.apply_page(page))
    }

    /// Publish a message to the current room and merge it locally.
    pub async fn send_message(
        &mut self,
        data: String,
        kind: MessageKind,
        response_to: Option<String>,
    ) -> Result<Message, ChatError> {
        self.state.require_connected("send_message")?;
        let author = self.require_local()?.clone();
        let codec = self.codec.as_ref().ok_or_else(|| {
            ChatError::new(ChatErrorCategory::Internal, "no_room", "no room entered")
        })?;

        // Ids are sender + timestamp, so two sends in one millisecond must differ.
        let timestamp = unix_millis().max(self.last_sent_ts.saturating_add(1));
        let message = Message {
            id: Message::compose_id(&author.id, timestamp),
            author,
            room: codec.room().to_owned(),
            kind,
            data,
            timestamp,
            response_to,
            version: LATEST_VERSION,
        };

        self.adapter.publish(codec.encode(&message)).await?;
        self.last_sent_ts = timestamp;
        self.timeline.merge(message.clone());
        debug!(message_id = %message.id, room = %message.room, "message published");
        Ok(message)
    }

    pub fn set_display_name(&mut self, name: &str) -> Result<Participant, ChatError> {
        self.state.require_connected("set_display_name")?;
        if !self.options.allow_rename {
            return Err(ChatError::new(
                ChatErrorCategory::Config,
                "rename_disabled",
                "display name changes are disabled",
            ));
        }

        let name = self.identity.set_display_name(name)?;
        let mut local = self.require_local()?.clone();
        local.name = name;
        self.timeline.set_local_participant(local.clone());
        self.local = Some(local.clone());
        info!(name = %local.name, "display name changed");
        Ok(local)
    }

    /// Stop the monitor, close the subscription and forget the room.
    pub async fn disconnect(&mut self) -> Result<(), ChatError> {
        self.state.apply(&chat_core::ChatCommand::Disconnect)?;
        self.teardown().await;
        info!("session disconnected");
        Ok(())
    }

    async fn teardown(&mut self) {
        if let Some(monitor) = self.liveness.take() {
            monitor.stop().await;
        }
        if let Err(err) = self.adapter.close_subscription().await {
            debug!(error = %err, "subscription already closed");
        }
        self.backfill.reset();
        self.codec = None;
        self.timeline.reset("");
    }

    fn require_local(&self) -> Result<&Participant, ChatError> {
        self.local.as_ref().ok_or_else(|| {
            ChatError::new(
                ChatErrorCategory::Internal,
                "identity_unavailable",
                "local identity is not resolved",
            )
        })
    }
}

/// Decode a history stream, counting frames the room codec rejects.
pub async fn fold_page(stream: FrameStream, codec: &RoomCodec) -> PageFold {
    stream
        .fold(PageFold::default(), |mut fold, frame| {
            fold.frames += 1;
            match codec.decode(&frame) {
                Ok(message) => fold.messages.push(message),
                Err(err) => {
                    debug!(error = %err, "dropping history frame");
                    fold.decode_failures += 1;
                }
            }
            fold
        })
        .await
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRelay;
    use chat_core::{BackfillState, TransportErrorKind, content_topic, schema};
    use chat_platform::InMemoryKeyValueStore;
    use std::time::Duration;

    type TestSession = ChatSession<InMemoryRelay, InMemoryKeyValueStore>;

    fn remote_message(author: &str, room: &str, ts: u64) -> Message {
        Message {
            id: Message::compose_id(author, ts),
            author: Participant::new(author, "Remote"),
            room: room.to_owned(),
            kind: MessageKind::Text,
            data: format!("hello at {ts}"),
            timestamp: ts,
            response_to: None,
            version: LATEST_VERSION,
        }
    }

    fn seed(relay: &InMemoryRelay, room: &str, timestamps: &[u64]) {
        let codec = RoomCodec::new("my-app", room);
        for &ts in timestamps {
            relay.inject(codec.encode(&remote_message("peer-z", room, ts)));
        }
    }

    async fn connected(relay: &InMemoryRelay, options: ChatOptions) -> (TestSession, SessionInbox) {
        let (mut session, mut inbox) = ChatSession::new(
            Arc::new(relay.clone()),
            InMemoryKeyValueStore::default(),
            options,
        );
        session.connect().await.expect("connect should work");
        session
            .fetch_page(&mut inbox)
            .await
            .expect("initial page should arrive");
        (session, inbox)
    }

    #[tokio::test]
    async fn connect_joins_first_room_and_loads_initial_page() {
        let relay = InMemoryRelay::new();
        seed(&relay, "General", &[100, 200, 300]);

        let options = ChatOptions {
            peers: vec!["/dns4/node-01/tcp/443/wss".to_owned()],
            ..ChatOptions::default()
        };
        let (session, _inbox) = connected(&relay, options).await;
        assert_eq!(session.status(), SessionStatus::Connected);
        assert_eq!(relay.bootstrap_peers(), vec!["/dns4/node-01/tcp/443/wss"]);
        assert_eq!(session.room(), Some("General"));
        assert_eq!(session.topic(), Some(content_topic("my-app", "General").as_str()));
        assert_eq!(session.timeline().len(), 3);
        assert_eq!(session.timeline().last_cursor(), Some(100));
        assert_eq!(relay.active_subscriptions("/my-app/1/general/proto"), 1);
    }

    #[tokio::test]
    async fn connect_without_usable_room_ends_disconnected() {
        let relay = InMemoryRelay::new();
        let options = ChatOptions {
            rooms: vec!["   ".to_owned()],
            ..ChatOptions::default()
        };
        let (mut session, _inbox) =
            ChatSession::new(Arc::new(relay), InMemoryKeyValueStore::default(), options);
        let err = session.connect().await.expect_err("blank room must fail");
        assert_eq!(err.code, "no_rooms");
        assert_eq!(session.status(), SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn live_and_backfill_copies_of_one_message_merge_once() {
        let relay = InMemoryRelay::new();
        let (mut session, mut inbox) = connected(&relay, ChatOptions::default()).await;
        let codec = RoomCodec::new("my-app", "General");
        let message = remote_message("peer-z", "General", 500);

        relay.inject(codec.encode(&message));
        let live = inbox.live.recv().await.expect("live frame");
        assert!(session.ingest_live(live));

        let applied = session.apply_page(FetchedPage {
            generation: session.backfill().generation(),
            result: Ok(PageFold {
                messages: vec![message.clone()],
                frames: 1,
                decode_failures: 0,
            }),
        });
        assert!(!applied.changed);
        assert_eq!(
            session
                .timeline()
                .messages()
                .iter()
                .filter(|m| m.id == message.id)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn live_frames_from_other_rooms_are_dropped() {
        let relay = InMemoryRelay::new();
        let (mut session, _inbox) = connected(&relay, ChatOptions::default()).await;
        let other = RoomCodec::new("my-app", "Random").encode(&remote_message("peer-z", "Random", 9));
        assert!(!session.ingest_live(other));
        assert!(session.timeline().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn three_empty_pages_pause_backfill_until_cooldown() {
        let relay = InMemoryRelay::new();
        seed(&relay, "General", &[100, 200]);
        let (mut session, mut inbox) = connected(&relay, ChatOptions::default()).await;
        let queries_after_initial = relay.query_count();

        for _ in 0..3 {
            assert!(matches!(session.try_fetch(), FetchDecision::Fetch(_)));
            session.fetch_page(&mut inbox).await.expect("page");
        }
        assert!(matches!(session.backfill().state(), BackfillState::Paused { .. }));
        assert_eq!(relay.query_count(), queries_after_initial + 3);

        assert!(matches!(
            session.try_fetch(),
            FetchDecision::Skip(SkipReason::Paused { .. })
        ));
        assert_eq!(relay.query_count(), queries_after_initial + 3);

        tokio::time::advance(session.options().fetch_pause() + Duration::from_millis(1)).await;
        assert!(matches!(session.try_fetch(), FetchDecision::Fetch(_)));
        session.fetch_page(&mut inbox).await.expect("page");
        assert_eq!(relay.query_count(), queries_after_initial + 4);
    }

    #[tokio::test]
    async fn invalid_cursor_rewinds_to_oldest_message() {
        let relay = InMemoryRelay::new();
        seed(&relay, "General", &[100, 200, 300]);
        let (mut session, mut inbox) = connected(&relay, ChatOptions::default()).await;

        relay.fail_next_query(TransportError::invalid_cursor("cursor unknown"));
        assert!(matches!(session.try_fetch(), FetchDecision::Fetch(_)));
        let applied = session.fetch_page(&mut inbox).await.expect("page");

        assert_eq!(
            applied.summary,
            PageSummary::CursorRecovered { cursor: 100 }
        );
        assert_eq!(session.timeline().last_cursor(), Some(100));
        assert!(!session.backfill().is_fetching());
    }

    #[tokio::test]
    async fn transient_query_failure_releases_the_fetch_lock() {
        let relay = InMemoryRelay::new();
        seed(&relay, "General", &[100]);
        let (mut session, mut inbox) = connected(&relay, ChatOptions::default()).await;

        relay.fail_next_query(TransportError::new(
            TransportErrorKind::Unavailable,
            "no store peers",
        ));
        session.try_fetch();
        let applied = session.fetch_page(&mut inbox).await.expect("page");
        assert_eq!(applied.summary, PageSummary::Failed);
        assert!(matches!(session.try_fetch(), FetchDecision::Fetch(_)));
    }

    #[tokio::test]
    async fn failed_first_page_does_not_stall_backfill() {
        let relay = InMemoryRelay::new();
        seed(&relay, "General", &[100, 200, 300]);
        relay.fail_next_query(TransportError::new(
            TransportErrorKind::Unavailable,
            "no store peers",
        ));

        let (mut session, mut inbox) = ChatSession::new(
            Arc::new(relay.clone()),
            InMemoryKeyValueStore::default(),
            ChatOptions::default(),
        );
        session.connect().await.expect("connect should work");
        let applied = session.fetch_page(&mut inbox).await.expect("initial page");
        assert_eq!(applied.summary, PageSummary::Failed);
        assert!(session.timeline().is_empty());

        assert!(matches!(session.try_fetch(), FetchDecision::Fetch(_)));
        session.fetch_page(&mut inbox).await.expect("retried page");
        assert_eq!(relay.query_count(), 2);
        assert_eq!(session.timeline().len(), 3);
        assert_eq!(session.timeline().last_cursor(), Some(100));
    }

    #[tokio::test]
    async fn system_messages_are_stored_but_do_not_count_as_yield() {
        let relay = InMemoryRelay::new();
        let (mut session, _inbox) = connected(&relay, ChatOptions::default()).await;

        let mut messages: Vec<Message> = (1..=3)
            .map(|ts| {
                let mut message = remote_message("peer-z", "General", ts);
                message.kind = MessageKind::System;
                message
            })
            .collect();
        messages.push(remote_message("peer-y", "General", 10));

        let applied = session.apply_page(FetchedPage {
            generation: session.backfill().generation(),
            result: Ok(PageFold {
                messages,
                frames: 4,
                decode_failures: 0,
            }),
        });

        assert!(applied.changed);
        assert!(matches!(
            applied.summary,
            PageSummary::Yielded {
                accepted: 1,
                low_yield: true,
                ..
            }
        ));
        assert_eq!(session.timeline().len(), 4);
        let feed = session.feed();
        assert_eq!(feed.len(), 1);
        assert!(feed.iter().all(|message| !message.is_system()));
    }

    #[tokio::test]
    async fn room_switch_drops_late_pages() {
        let relay = InMemoryRelay::new();
        seed(&relay, "General", &[100, 200, 300]);
        let (mut session, mut inbox) = connected(&relay, ChatOptions::default()).await;

        assert!(matches!(session.try_fetch(), FetchDecision::Fetch(_)));
        session.enter_room("Random").await.expect("switch room");

        let mut stale = 0;
        for _ in 0..2 {
            let applied = session.fetch_page(&mut inbox).await.expect("page");
            if applied.summary == PageSummary::Stale {
                stale += 1;
            }
        }
        assert_eq!(stale, 1);
        assert_eq!(session.room(), Some("Random"));
        assert!(session.timeline().is_empty());
        assert_eq!(relay.active_subscriptions("/my-app/1/general/proto"), 0);
    }

    #[tokio::test]
    async fn sent_messages_are_published_and_merged_once() {
        let relay = InMemoryRelay::new();
        let (mut session, mut inbox) = connected(&relay, ChatOptions::default()).await;

        let first = session
            .send_message("hi".into(), MessageKind::Text, None)
            .await
            .expect("send should work");
        let second = session
            .send_message("again".into(), MessageKind::Text, Some(first.id.clone()))
            .await
            .expect("send should work");
        assert_ne!(first.id, second.id);
        assert!(second.timestamp > first.timestamp);

        let echo = inbox.live.recv().await.expect("relay echoes own frames");
        assert!(!session.ingest_live(echo));
        assert_eq!(session.timeline().len(), 2);

        let stored = relay.stored_frames("/my-app/1/general/proto");
        assert_eq!(stored, 2);
        let decoded = schema::decode_latest(&RoomCodec::new("my-app", "General").encode(&second).payload)
            .expect("payload decodes");
        assert_eq!(decoded.response_to, Some(first.id));
    }

    #[tokio::test]
    async fn private_rooms_are_symmetric_and_can_be_disabled() {
        let relay = InMemoryRelay::with_peer_id("abc");
        let (mut session, _inbox) = connected(&relay, ChatOptions::default()).await;
        session
            .enter_private_room("xyz")
            .await
            .expect("private room");
        assert_eq!(session.room(), Some("abc & xyz"));

        let relay = InMemoryRelay::with_peer_id("abc");
        let options = ChatOptions {
            allow_private_chat: false,
            ..ChatOptions::default()
        };
        let (mut session, _inbox) = connected(&relay, options).await;
        let err = session
            .enter_private_room("xyz")
            .await
            .expect_err("private rooms disabled");
        assert_eq!(err.code, "private_chat_disabled");
    }

    #[tokio::test]
    async fn rename_updates_local_participant() {
        let relay = InMemoryRelay::new();
        let (mut session, _inbox) = connected(&relay, ChatOptions::default()).await;
        let me = session.set_display_name("Alice").expect("rename");
        assert_eq!(me.name, "Alice");
        assert!(session.participants().iter().any(|p| p.name == "Alice"));

        let options = ChatOptions {
            allow_rename: false,
            ..ChatOptions::default()
        };
        let (mut locked, _inbox) = connected(&InMemoryRelay::new(), options).await;
        let err = locked.set_display_name("Bob").expect_err("rename disabled");
        assert_eq!(err.code, "rename_disabled");
    }

    #[tokio::test]
    async fn disconnect_tears_down_subscription() {
        let relay = InMemoryRelay::new();
        let (mut session, _inbox) = connected(&relay, ChatOptions::default()).await;
        session.disconnect().await.expect("disconnect");
        assert_eq!(session.status(), SessionStatus::Disconnected);
        assert_eq!(relay.active_subscriptions("/my-app/1/general/proto"), 0);
        assert_eq!(session.room(), None);
        assert_eq!(session.try_fetch(), FetchDecision::Skip(SkipReason::NoCursor));
    }
}
