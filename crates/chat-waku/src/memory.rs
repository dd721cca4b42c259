//! Loopback pub/sub network for tests and local demos.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use chat_core::{Frame, TransportError, TransportErrorKind};
use tracing::debug;
use uuid::Uuid;

use crate::transport::{
    FrameSink, FrameStream, HistoryQuery, PageDirection, PubSubService, SubscriptionId,
};

struct RelaySubscription {
    topic: String,
    sink: FrameSink,
}

#[derive(Default)]
struct RelayNetwork {
    history: HashMap<String, Vec<Frame>>,
    subscriptions: HashMap<SubscriptionId, RelaySubscription>,
    queued_query_failures: VecDeque<TransportError>,
    query_count: usize,
}

impl RelayNetwork {
    fn deliver(&mut self, frame: Frame) {
        self.subscriptions.retain(|id, subscription| {
            if subscription.topic != frame.topic {
                return true;
            }
            let delivered = subscription.sink.send(frame.clone()).is_ok();
            if !delivered {
                debug!(subscription = %id, "dropping subscription with closed sink");
            }
            delivered
        });
        self.history
            .entry(frame.topic.clone())
            .or_default()
            .push(frame);
    }
}

/// In-process node sharing one network with every node created via [`InMemoryRelay::peer`].
#[derive(Clone)]
pub struct InMemoryRelay {
    peer_id: String,
    started: Arc<AtomicBool>,
    bootstrap_peers: Arc<Mutex<Vec<String>>>,
    network: Arc<Mutex<RelayNetwork>>,
}

impl Default for InMemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self::with_peer_id(generate_peer_id())
    }

    pub fn with_peer_id(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            started: Arc::new(AtomicBool::new(false)),
            bootstrap_peers: Arc::default(),
            network: Arc::new(Mutex::new(RelayNetwork::default())),
        }
    }

    /// Another node on the same network, with its own peer id.
    pub fn peer(&self) -> Self {
        Self {
            peer_id: generate_peer_id(),
            started: Arc::new(AtomicBool::new(false)),
            bootstrap_peers: Arc::default(),
            network: Arc::clone(&self.network),
        }
    }

    /// Bootstrap peers passed to the last `start`.
    pub fn bootstrap_peers(&self) -> Vec<String> {
        self.bootstrap_peers
            .lock()
            .map(|peers| peers.clone())
            .unwrap_or_default()
    }

    /// Store a frame and fan it out as if a remote node had published it.
    pub fn inject(&self, frame: Frame) {
        if let Ok(mut network) = self.network.lock() {
            network.deliver(frame);
        }
    }

    /// Forget every live subscription, as a restarted remote peer would.
    pub fn drop_subscriptions(&self) -> usize {
        self.network
            .lock()
            .map(|mut network| {
                let dropped = network.subscriptions.len();
                network.subscriptions.clear();
                dropped
            })
            .unwrap_or(0)
    }

    pub fn active_subscriptions(&self, topic: &str) -> usize {
        self.network
            .lock()
            .map(|network| {
                network
                    .subscriptions
                    .values()
                    .filter(|subscription| subscription.topic == topic)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn stored_frames(&self, topic: &str) -> usize {
        self.network
            .lock()
            .map(|network| network.history.get(topic).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Number of store queries served so far, failed ones included.
    pub fn query_count(&self) -> usize {
        self.network
            .lock()
            .map(|network| network.query_count)
            .unwrap_or(0)
    }

    /// Make the next store query fail with `error`.
    pub fn fail_next_query(&self, error: TransportError) {
        if let Ok(mut network) = self.network.lock() {
            network.queued_query_failures.push_back(error);
        }
    }

    fn network(&self) -> Result<MutexGuard<'_, RelayNetwork>, TransportError> {
        self.network
            .lock()
            .map_err(|_| TransportError::new(TransportErrorKind::Other, "poisoned lock"))
    }

    fn require_started(&self) -> Result<(), TransportError> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::new(
                TransportErrorKind::NotStarted,
                format!("node {} is not started", self.peer_id),
            ))
        }
    }
}

#[async_trait]
impl PubSubService for InMemoryRelay {
    async fn start(&self, peers: &[String]) -> Result<(), TransportError> {
        if let Ok(mut bootstrap) = self.bootstrap_peers.lock() {
            *bootstrap = peers.to_vec();
        }
        debug!(peer_id = %self.peer_id, peers = peers.len(), "relay node started");
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn local_peer_id(&self) -> String {
        self.peer_id.clone()
    }

    async fn subscribe(
        &self,
        topic: &str,
        sink: FrameSink,
    ) -> Result<SubscriptionId, TransportError> {
        self.require_started()?;
        let id = SubscriptionId::new();
        self.network()?.subscriptions.insert(
            id,
            RelaySubscription {
                topic: topic.to_owned(),
                sink,
            },
        );
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError> {
        match self.network()?.subscriptions.remove(&id) {
            Some(_) => Ok(()),
            None => Err(TransportError::no_subscription(format!(
                "unknown subscription {id}"
            ))),
        }
    }

    async fn ping(&self, id: SubscriptionId) -> Result<(), TransportError> {
        self.require_started()?;
        if self.network()?.subscriptions.contains_key(&id) {
            Ok(())
        } else {
            Err(TransportError::no_subscription("peer has no subscriptions"))
        }
    }

    async fn publish(&self, mut frame: Frame) -> Result<(), TransportError> {
        self.require_started()?;
        if frame.timestamp_ms.is_none() {
            frame.timestamp_ms = Some(unix_millis());
        }
        self.network()?.deliver(frame);
        Ok(())
    }

    async fn query(&self, query: HistoryQuery) -> Result<FrameStream, TransportError> {
        self.require_started()?;
        let mut network = self.network()?;
        network.query_count += 1;
        if let Some(error) = network.queued_query_failures.pop_front() {
            return Err(error);
        }

        let mut frames: Vec<Frame> = network
            .history
            .get(&query.content_topic)
            .map(|frames| {
                frames
                    .iter()
                    .filter(|frame| {
                        query
                            .time_filter
                            .contains(frame.timestamp_ms.unwrap_or_default())
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(network);

        frames.sort_by_key(|frame| frame.timestamp_ms.unwrap_or_default());
        if query.direction == PageDirection::Backward {
            frames.reverse();
        }
        frames.truncate(query.page_size as usize);

        Ok(Box::pin(tokio_stream::iter(frames)))
    }
}

fn generate_peer_id() -> String {
    format!("16Uiu2{}", Uuid::new_v4().simple())
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
