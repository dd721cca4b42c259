use std::{fmt, pin::Pin, sync::Arc};

use async_trait::async_trait;
use chat_core::{Frame, HistoryRequest, TransportError};
use tokio::sync::{Mutex, mpsc};
use tokio_stream::Stream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Receives live frames for one subscription.
pub type FrameSink = mpsc::UnboundedSender<Frame>;

/// Lazy, finite sequence of historical frames.
pub type FrameStream = Pin<Box<dyn Stream<Item = Frame> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageDirection {
    /// Newest to oldest.
    #[default]
    Backward,
    Forward,
}

/// Timestamp bounds in milliseconds. `start_time` is inclusive, `end_time` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeFilter {
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
}

impl TimeFilter {
    pub fn contains(&self, timestamp: u64) -> bool {
        self.start_time.is_none_or(|start| timestamp >= start)
            && self.end_time.is_none_or(|end| timestamp < end)
    }
}

/// Store query for one page of history on a content topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub content_topic: String,
    pub page_size: u32,
    pub direction: PageDirection,
    pub time_filter: TimeFilter,
}

/// External pub/sub node: live relay, store queries and publishing.
#[async_trait]
pub trait PubSubService: Send + Sync + 'static {
    /// Start the node and dial the given bootstrap peers.
    async fn start(&self, peers: &[String]) -> Result<(), TransportError>;

    fn local_peer_id(&self) -> String;

    async fn subscribe(&self, topic: &str, sink: FrameSink)
    -> Result<SubscriptionId, TransportError>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError>;

    /// Fails with `NoSubscription` once the remote side forgot `id`.
    async fn ping(&self, id: SubscriptionId) -> Result<(), TransportError>;

    async fn publish(&self, frame: Frame) -> Result<(), TransportError>;

    async fn query(&self, query: HistoryQuery) -> Result<FrameStream, TransportError>;
}

#[derive(Debug, Clone)]
struct SubscriptionHandle {
    id: SubscriptionId,
    topic: String,
    sink: FrameSink,
}

/// Sole owner of the service connection and the active subscription handle.
///
/// The handle lives behind one async mutex shared by the session and the
/// liveness monitor. The lock is held across service calls only while the
/// session replaces or closes the handle; pings and resubscribes work on a
/// copy and swap the result in by id.
pub struct TransportAdapter<S: PubSubService> {
    service: Arc<S>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl<S: PubSubService> TransportAdapter<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self {
            service,
            subscription: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    pub async fn start(&self, peers: &[String]) -> Result<(), TransportError> {
        self.service.start(peers).await
    }

    pub fn local_peer_id(&self) -> String {
        self.service.local_peer_id()
    }

    /// Subscribe to `topic`, replacing any previous subscription.
    pub async fn open_subscription(
        &self,
        topic: &str,
        sink: FrameSink,
    ) -> Result<SubscriptionId, TransportError> {
        let mut guard = self.subscription.lock().await;
        if let Some(previous) = guard.take()
            && let Err(err) = self.service.unsubscribe(previous.id).await
        {
            debug!(topic = %previous.topic, error = %err, "previous subscription already gone");
        }

        let id = self.service.subscribe(topic, sink.clone()).await?;
        *guard = Some(SubscriptionHandle {
            id,
            topic: topic.to_owned(),
            sink,
        });
        info!(topic, subscription = %id, "subscription opened");
        Ok(id)
    }

    pub async fn close_subscription(&self) -> Result<(), TransportError> {
        let previous = self.subscription.lock().await.take();
        let Some(previous) = previous else {
            return Ok(());
        };

        self.service.unsubscribe(previous.id).await?;
        debug!(topic = %previous.topic, "subscription closed");
        Ok(())
    }

    /// Ping the active subscription. `Ok(None)` when nothing is subscribed.
    pub async fn ping(&self) -> Result<Option<SubscriptionId>, TransportError> {
        let id = self.subscription.lock().await.as_ref().map(|handle| handle.id);
        let Some(id) = id else {
            return Ok(None);
        };
        self.service.ping(id).await?;
        Ok(Some(id))
    }

    /// Re-subscribe the current topic with the same sink.
    ///
    /// The new handle is installed only if the stale one is still current;
    /// if the session switched rooms meanwhile the fresh subscription is
    /// dropped again. On failure the old handle is kept so the next ping
    /// retries.
    pub async fn resubscribe(&self) -> Result<SubscriptionId, TransportError> {
        let stale = self.subscription.lock().await.clone();
        let Some(stale) = stale else {
            return Err(TransportError::no_subscription(
                "no active subscription to restore",
            ));
        };

        if let Err(err) = self.service.unsubscribe(stale.id).await {
            debug!(topic = %stale.topic, error = %err, "stale subscription already gone");
        }

        let id = match self.service.subscribe(&stale.topic, stale.sink.clone()).await {
            Ok(id) => id,
            Err(err) => {
                warn!(topic = %stale.topic, error = %err, "resubscribe failed");
                return Err(err);
            }
        };

        let mut guard = self.subscription.lock().await;
        if let Some(current) = guard.as_mut()
            && current.id == stale.id
        {
            current.id = id;
            info!(topic = %stale.topic, subscription = %id, "subscription restored");
            return Ok(id);
        }
        let current = guard.as_ref().map(|handle| handle.id);
        drop(guard);

        debug!(topic = %stale.topic, "subscription replaced during resubscribe");
        if let Err(err) = self.service.unsubscribe(id).await {
            debug!(subscription = %id, error = %err, "discarded subscription already gone");
        }
        current.ok_or_else(|| {
            TransportError::no_subscription("subscription closed during resubscribe")
        })
    }

    /// Query one page of history older than the request cursor.
    pub async fn query_historical(
        &self,
        topic: &str,
        request: &HistoryRequest,
    ) -> Result<FrameStream, TransportError> {
        let query = HistoryQuery {
            content_topic: topic.to_owned(),
            page_size: request.page_size,
            direction: PageDirection::Backward,
            time_filter: TimeFilter {
                start_time: request.start_after,
                end_time: request.end_before,
            },
        };
        debug!(
            topic,
            page_size = query.page_size,
            start_time = ?query.time_filter.start_time,
            end_time = ?query.time_filter.end_time,
            "querying history"
        );
        self.service.query(query).await
    }

    pub async fn publish(&self, frame: Frame) -> Result<(), TransportError> {
        self.service.publish(frame).await
    }
}
