use std::sync::Arc;

use chat_core::{
    ChatCommand, ChatError, ChatEvent, ChatOptions, FetchDecision, MessageKind, PageSummary,
    SendOutcome, SessionStatus, SkipReason, normalize_error, normalize_send_outcome,
};
use chat_platform::KeyValueStore;
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc},
    time::Instant,
};
use tracing::{debug, info};

use crate::{
    session::{ChatSession, FetchedPage, SessionInbox},
    transport::PubSubService,
};

const COMMAND_BUFFER: usize = 128;
const EVENT_BUFFER: usize = 512;

/// Broadcast event stream handed to UI subscribers.
pub type EventStream = broadcast::Receiver<ChatEvent>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime task has exited and no longer reads commands.
    #[error("chat runtime has stopped")]
    Stopped,
}

#[derive(Clone, Debug)]
pub struct ChatRuntimeHandle {
    commands: mpsc::Sender<ChatCommand>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatRuntimeHandle {
    pub async fn send(&self, command: ChatCommand) -> Result<(), RuntimeError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RuntimeError::Stopped)
    }

    /// Events emitted before this call are not replayed.
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }
}

/// Spawn the session owner task and return its command/event handle.
pub fn spawn_runtime<S, K>(service: Arc<S>, store: K, options: ChatOptions) -> ChatRuntimeHandle
where
    S: PubSubService,
    K: KeyValueStore + 'static,
{
    let (session, inbox) = ChatSession::new(service, store, options);
    let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (events, _) = broadcast::channel(EVENT_BUFFER);
    let runtime = ChatRuntime {
        events: events.clone(),
        command_rx,
        session,
        inbox,
        recheck_at: None,
    };
    tokio::spawn(async move {
        runtime.run().await;
    });

    ChatRuntimeHandle { commands, events }
}

struct ChatRuntime<S: PubSubService, K: KeyValueStore> {
    events: broadcast::Sender<ChatEvent>,
    command_rx: mpsc::Receiver<ChatCommand>,
    session: ChatSession<S, K>,
    inbox: SessionInbox,
    /// When a paused backfill may be retried.
    recheck_at: Option<Instant>,
}

impl<S: PubSubService, K: KeyValueStore> ChatRuntime<S, K> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if let Err(err) = self.handle_command(command).await {
                        self.emit(normalize_error(err));
                    }
                }
                Some(frame) = self.inbox.live.recv() => {
                    if self.session.ingest_live(frame) {
                        self.emit_timeline();
                    }
                }
                Some(page) = self.inbox.pages.recv() => self.handle_page(page),
                _ = pause_elapsed(self.recheck_at) => {
                    self.recheck_at = None;
                    debug!("backfill pause elapsed; retrying");
                    self.handle_fetch();
                }
            }
        }

        debug!("chat runtime stopped");
    }

    async fn handle_command(&mut self, command: ChatCommand) -> Result<(), ChatError> {
        match command {
            ChatCommand::Connect => {
                self.handle_connect().await;
                Ok(())
            }
            ChatCommand::EnterRoom { room } => {
                self.session.enter_room(&room).await?;
                self.after_room_change();
                Ok(())
            }
            ChatCommand::EnterPrivateRoom { participant_id } => {
                self.session.enter_private_room(&participant_id).await?;
                self.after_room_change();
                Ok(())
            }
            ChatCommand::SendMessage {
                client_txn_id,
                data,
                kind,
                response_to,
            } => {
                self.handle_send_message(client_txn_id, data, kind, response_to)
                    .await;
                Ok(())
            }
            ChatCommand::LoadMore => {
                let status = self.session.status();
                if status != SessionStatus::Connected {
                    return Err(ChatError::invalid_state(status, "load_more"));
                }
                self.handle_fetch();
                Ok(())
            }
            ChatCommand::SetDisplayName { name } => {
                self.session.set_display_name(&name)?;
                self.emit_timeline();
                Ok(())
            }
            ChatCommand::Disconnect => {
                self.session.disconnect().await?;
                self.recheck_at = None;
                self.emit_status();
                Ok(())
            }
        }
    }

    async fn handle_connect(&mut self) {
        let before = self.session.status();
        let result = self.session.connect().await;

        if self.session.status() != before {
            self.emit(ChatEvent::StatusChanged {
                status: SessionStatus::Connecting,
            });
            self.emit_status();
        }

        match result {
            Ok(()) => self.after_room_change(),
            Err(err) if self.session.status() == SessionStatus::Disconnected => {
                // Setup failures end the session; the UI has to reconnect.
                self.emit(ChatEvent::Error {
                    code: err.code,
                    message: err.message,
                    recoverable: false,
                });
            }
            Err(err) => self.emit(normalize_error(err)),
        }
    }

    async fn handle_send_message(
        &mut self,
        client_txn_id: String,
        data: String,
        kind: MessageKind,
        response_to: Option<String>,
    ) {
        let outcome = match self.session.send_message(data, kind, response_to).await {
            Ok(message) => SendOutcome::Published {
                message_id: message.id,
            },
            Err(error) => SendOutcome::Failed { error },
        };
        let published = matches!(outcome, SendOutcome::Published { .. });

        self.emit(normalize_send_outcome(client_txn_id, outcome));
        if published {
            self.emit_timeline();
        }
    }

    fn handle_fetch(&mut self) {
        if let FetchDecision::Skip(SkipReason::Paused {
            retry_at,
            newly_paused,
        }) = self.session.try_fetch()
        {
            self.arm_recheck(retry_at, newly_paused);
        }
    }

    fn handle_page(&mut self, page: FetchedPage) {
        let applied = self.session.apply_page(page);
        if applied.changed {
            self.emit_timeline();
        }

        match applied.summary {
            PageSummary::Yielded { paused: true, .. } => {
                if let Some(until) = self.session.backfill().paused_until() {
                    self.arm_recheck(until, true);
                }
            }
            PageSummary::Yielded {
                low_yield: false, ..
            } if !self.session.options().fetch_on_scroll => {
                // Without scroll-driven paging the runtime drains history itself.
                self.handle_fetch();
            }
            _ => {}
        }
    }

    fn arm_recheck(&mut self, until: Instant, announce: bool) {
        self.recheck_at = Some(until);
        if announce {
            let retry_after_ms = until
                .saturating_duration_since(Instant::now())
                .as_millis() as u64;
            info!(retry_after_ms, "backfill paused");
            self.emit(ChatEvent::BackfillPaused { retry_after_ms });
        }
    }

    fn after_room_change(&mut self) {
        self.recheck_at = None;
        if let (Some(room), Some(topic)) = (self.session.room(), self.session.topic()) {
            self.emit(ChatEvent::RoomChanged {
                room: room.to_owned(),
                topic: topic.to_owned(),
            });
        }
        self.emit_timeline();
    }

    /// Best-effort; a runtime without subscribers drops the event.
    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    fn emit_status(&self) {
        self.emit(ChatEvent::StatusChanged {
            status: self.session.status(),
        });
    }

    fn emit_timeline(&self) {
        self.emit(ChatEvent::TimelineUpdated {
            room: self.session.room().unwrap_or_default().to_owned(),
            messages: self.session.feed(),
            participants: self.session.participants(),
        });
    }
}

async fn pause_elapsed(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRelay;
    use chat_core::{LATEST_VERSION, Message, Participant, RoomCodec};
    use chat_platform::InMemoryKeyValueStore;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_event(events: &mut EventStream) -> ChatEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event timeout")
            .expect("event receive")
    }

    async fn wait_for<F>(events: &mut EventStream, mut predicate: F) -> ChatEvent
    where
        F: FnMut(&ChatEvent) -> bool,
    {
        loop {
            let event = next_event(events).await;
            if predicate(&event) {
                return event;
            }
        }
    }

    fn seed_one(relay: &InMemoryRelay) {
        let codec = RoomCodec::new("my-app", "General");
        relay.inject(codec.encode(&Message {
            id: "peer-z100".to_owned(),
            author: Participant::new("peer-z", "Zed"),
            room: "General".to_owned(),
            kind: MessageKind::Text,
            data: "earlier".to_owned(),
            timestamp: 100,
            response_to: None,
            version: LATEST_VERSION,
        }));
    }

    fn spawn(relay: &InMemoryRelay, options: ChatOptions) -> ChatRuntimeHandle {
        spawn_runtime(
            Arc::new(relay.clone()),
            InMemoryKeyValueStore::default(),
            options,
        )
    }

    #[tokio::test]
    async fn runtime_emits_fatal_error_for_invalid_transition() {
        let handle = spawn(&InMemoryRelay::new(), ChatOptions::default());
        let mut events = handle.subscribe();

        handle
            .send(ChatCommand::LoadMore)
            .await
            .expect("command should enqueue");

        match next_event(&mut events).await {
            ChatEvent::Error { code, .. } => assert_eq!(code, "invalid_state_transition"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_fails_once_runtime_has_stopped() {
        let (commands, command_rx) = mpsc::channel(1);
        let (events, _) = broadcast::channel(1);
        drop(command_rx);
        let handle = ChatRuntimeHandle { commands, events };

        let err = handle
            .send(ChatCommand::LoadMore)
            .await
            .expect_err("send must fail once the runtime is gone");
        assert_eq!(err, RuntimeError::Stopped);
    }

    #[tokio::test]
    async fn events_fan_out_to_every_subscriber() {
        let handle = spawn(&InMemoryRelay::new(), ChatOptions::default());
        let mut first = handle.subscribe();
        let mut second = handle.subscribe();

        handle
            .send(ChatCommand::LoadMore)
            .await
            .expect("command should enqueue");

        assert_eq!(next_event(&mut first).await, next_event(&mut second).await);
    }

    #[tokio::test]
    async fn runtime_send_outside_connected_session_emits_send_ack_failure() {
        let handle = spawn(&InMemoryRelay::new(), ChatOptions::default());
        let mut events = handle.subscribe();

        handle
            .send(ChatCommand::SendMessage {
                client_txn_id: "tx-1".to_owned(),
                data: "hello".to_owned(),
                kind: MessageKind::Text,
                response_to: None,
            })
            .await
            .expect("command should enqueue");

        match next_event(&mut events).await {
            ChatEvent::SendAck(ack) => {
                assert_eq!(ack.client_txn_id, "tx-1");
                assert_eq!(ack.message_id, None);
                assert_eq!(ack.error_code.as_deref(), Some("invalid_state_transition"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_announces_status_room_and_history() {
        let relay = InMemoryRelay::new();
        seed_one(&relay);

        let handle = spawn(&relay, ChatOptions::default());
        let mut events = handle.subscribe();
        handle
            .send(ChatCommand::Connect)
            .await
            .expect("command should enqueue");

        assert_eq!(
            next_event(&mut events).await,
            ChatEvent::StatusChanged {
                status: SessionStatus::Connecting
            }
        );
        assert_eq!(
            next_event(&mut events).await,
            ChatEvent::StatusChanged {
                status: SessionStatus::Connected
            }
        );
        assert_eq!(
            next_event(&mut events).await,
            ChatEvent::RoomChanged {
                room: "General".to_owned(),
                topic: "/my-app/1/general/proto".to_owned(),
            }
        );

        let event = wait_for(&mut events, |event| {
            matches!(event, ChatEvent::TimelineUpdated { messages, .. } if !messages.is_empty())
        })
        .await;
        match event {
            ChatEvent::TimelineUpdated { messages, .. } => assert_eq!(messages[0].id, "peer-z100"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn two_peers_exchange_messages() {
        let alice_node = InMemoryRelay::new();
        let bob_node = alice_node.peer();
        let alice = spawn(&alice_node, ChatOptions::default());
        let bob = spawn(&bob_node, ChatOptions::default());
        let mut bob_events = bob.subscribe();

        alice.send(ChatCommand::Connect).await.expect("alice connect");
        bob.send(ChatCommand::Connect).await.expect("bob connect");
        wait_for(&mut bob_events, |event| {
            matches!(event, ChatEvent::RoomChanged { .. })
        })
        .await;

        let mut alice_events = alice.subscribe();
        alice
            .send(ChatCommand::SendMessage {
                client_txn_id: "tx-a".to_owned(),
                data: "hi bob".to_owned(),
                kind: MessageKind::Text,
                response_to: None,
            })
            .await
            .expect("send should enqueue");

        let ack = wait_for(&mut alice_events, |event| matches!(event, ChatEvent::SendAck(_))).await;
        assert!(matches!(ack, ChatEvent::SendAck(ack) if ack.error_code.is_none()));

        wait_for(&mut bob_events, |event| {
            matches!(
                event,
                ChatEvent::TimelineUpdated { messages, .. }
                    if messages.iter().any(|message| message.data == "hi bob")
            )
        })
        .await;
    }

    #[tokio::test]
    async fn disconnect_reports_status() {
        let handle = spawn(&InMemoryRelay::new(), ChatOptions::default());
        let mut events = handle.subscribe();
        handle.send(ChatCommand::Connect).await.expect("connect");
        handle.send(ChatCommand::Disconnect).await.expect("disconnect");

        wait_for(&mut events, |event| {
            *event
                == ChatEvent::StatusChanged {
                    status: SessionStatus::Disconnected,
                }
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn paused_backfill_retries_once_after_cooldown() {
        let relay = InMemoryRelay::new();
        seed_one(&relay);
        let options = ChatOptions {
            max_fetch_attempts: 1,
            ..ChatOptions::default()
        };
        let handle = spawn(&relay, options);
        let mut events = handle.subscribe();

        handle.send(ChatCommand::Connect).await.expect("connect");
        // A one-message initial page counts as low-yield and pauses backfill.
        let paused = wait_for(&mut events, |event| {
            matches!(event, ChatEvent::BackfillPaused { .. })
        })
        .await;
        assert_eq!(paused, ChatEvent::BackfillPaused { retry_after_ms: 15_000 });
        let queries = relay.query_count();

        handle.send(ChatCommand::LoadMore).await.expect("load more");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(relay.query_count(), queries);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(relay.query_count(), queries + 1);
    }
}
