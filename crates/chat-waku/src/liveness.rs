use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{PubSubService, TransportAdapter};

/// Default interval between subscription pings.
pub const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Result of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessCheck {
    /// No subscription is open.
    Idle,
    Alive,
    /// The subscription was lost and has been re-established.
    Resubscribed,
    /// Ping or resubscribe failed; retried on the next tick.
    Transient,
}

/// Ping the active subscription once and restore it if the peer forgot it.
pub async fn check_once<S: PubSubService>(adapter: &TransportAdapter<S>) -> LivenessCheck {
    match adapter.ping().await {
        Ok(None) => LivenessCheck::Idle,
        Ok(Some(_)) => LivenessCheck::Alive,
        Err(err) if err.is_subscription_lost() => {
            info!(error = %err, "subscription lost; resubscribing");
            match adapter.resubscribe().await {
                Ok(_) => LivenessCheck::Resubscribed,
                Err(err) => {
                    warn!(error = %err, "resubscribe attempt failed");
                    LivenessCheck::Transient
                }
            }
        }
        Err(err) => {
            warn!(error = %err, "subscription ping failed");
            LivenessCheck::Transient
        }
    }
}

/// Background task pinging the subscription on a fixed interval.
pub struct LivenessMonitor {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl LivenessMonitor {
    pub fn spawn<S: PubSubService>(adapter: Arc<TransportAdapter<S>>, interval: Duration) -> Self {
        let stop = CancellationToken::new();
        let stop_child = stop.child_token();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(interval_ms = interval.as_millis() as u64, "liveness monitor started");

            loop {
                tokio::select! {
                    _ = stop_child.cancelled() => break,
                    _ = ticker.tick() => {
                        let outcome = check_once(&adapter).await;
                        debug!(?outcome, "liveness check finished");
                    }
                }
            }

            debug!("liveness monitor stopped");
        });

        Self { stop, task }
    }

    /// Cancel the monitor and wait for the task to exit.
    pub async fn stop(mut self) {
        self.stop.cancel();
        let _ = (&mut self.task).await;
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRelay;
    use chat_core::Frame;
    use tokio::sync::mpsc;

    const TOPIC: &str = "/my-app/1/general/proto";

    async fn subscribed_adapter(
        relay: &InMemoryRelay,
    ) -> (Arc<TransportAdapter<InMemoryRelay>>, mpsc::UnboundedReceiver<Frame>) {
        let adapter = Arc::new(TransportAdapter::new(Arc::new(relay.clone())));
        adapter.start(&[]).await.expect("start should work");
        let (tx, rx) = mpsc::unbounded_channel();
        adapter
            .open_subscription(TOPIC, tx)
            .await
            .expect("subscription should open");
        (adapter, rx)
    }

    #[tokio::test]
    async fn check_restores_lost_subscription() {
        let relay = InMemoryRelay::new();
        let (adapter, _rx) = subscribed_adapter(&relay).await;

        assert_eq!(check_once(&adapter).await, LivenessCheck::Alive);
        relay.drop_subscriptions();
        assert_eq!(check_once(&adapter).await, LivenessCheck::Resubscribed);
        assert_eq!(relay.active_subscriptions(TOPIC), 1);
    }

    #[tokio::test]
    async fn check_is_idle_without_subscription() {
        let relay = InMemoryRelay::new();
        let adapter = TransportAdapter::new(Arc::new(relay));
        assert_eq!(check_once(&adapter).await, LivenessCheck::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_recovers_subscription_within_one_interval() {
        let relay = InMemoryRelay::new();
        let (adapter, mut rx) = subscribed_adapter(&relay).await;
        let monitor = LivenessMonitor::spawn(Arc::clone(&adapter), PING_INTERVAL);

        relay.drop_subscriptions();
        assert_eq!(relay.active_subscriptions(TOPIC), 0);

        tokio::time::sleep(PING_INTERVAL + Duration::from_millis(50)).await;
        assert_eq!(relay.active_subscriptions(TOPIC), 1);

        relay.inject(Frame {
            topic: TOPIC.to_owned(),
            payload: vec![7],
            timestamp_ms: Some(1),
        });
        let frame = rx.recv().await.expect("frames flow after recovery");
        assert_eq!(frame.payload, vec![7]);

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_monitor_no_longer_pings() {
        let relay = InMemoryRelay::new();
        let (adapter, _rx) = subscribed_adapter(&relay).await;
        let monitor = LivenessMonitor::spawn(Arc::clone(&adapter), PING_INTERVAL);
        monitor.stop().await;

        relay.drop_subscriptions();
        tokio::time::sleep(PING_INTERVAL * 3).await;
        assert_eq!(relay.active_subscriptions(TOPIC), 0);
    }
}
