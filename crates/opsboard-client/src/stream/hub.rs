use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use super::reconnect::ReconnectPolicy;
use super::source::{EventSource, StreamRequest};
use super::subscription::{Subscription, SubscriptionCloser, SubscriptionOptions};

/// Registry of live subscriptions, at most one per stream key.
#[derive(Clone)]
pub struct StreamHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    source: Arc<dyn EventSource>,
    options: SubscriptionOptions,
    active: DashMap<String, SubscriptionCloser>,
    /// Serializes close-previous, open and register so overlapping
    /// subscribes for one key cannot both stay live.
    registry: Mutex<()>,
}

impl StreamHub {
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self::with_options(source, SubscriptionOptions::default())
    }

    pub fn with_options(source: Arc<dyn EventSource>, options: SubscriptionOptions) -> Self {
        Self {
            inner: Arc::new(HubInner {
                source,
                options,
                active: DashMap::new(),
                registry: Mutex::new(()),
            }),
        }
    }

    /// Opens a subscription for `request.key`, closing and awaiting any
    /// previous connection under the same key first.
    pub async fn subscribe(&self, request: StreamRequest) -> Subscription {
        let _registry = self.inner.registry.lock().await;
        self.replace(&request.key).await;
        let sub = Subscription::open(
            self.inner.source.clone(),
            request,
            self.inner.options.clone(),
        );
        self.track(&sub).await;
        sub
    }

    /// Like [`StreamHub::subscribe`], with reconnection.
    pub async fn subscribe_reconnecting(
        &self,
        request: StreamRequest,
        policy: ReconnectPolicy,
    ) -> Subscription {
        let _registry = self.inner.registry.lock().await;
        self.replace(&request.key).await;
        let sub = Subscription::open_reconnecting(
            self.inner.source.clone(),
            request,
            policy,
            self.inner.options.clone(),
        );
        self.track(&sub).await;
        sub
    }

    /// Closes the subscription under `key`, if any, and waits for it.
    pub async fn unsubscribe(&self, key: &str) -> bool {
        let _registry = self.inner.registry.lock().await;
        match self.inner.active.remove(key) {
            Some((_, closer)) => {
                closer.close_and_wait().await;
                true
            }
            None => false,
        }
    }

    /// Keys with a connection that has not closed yet.
    pub fn active_keys(&self) -> Vec<String> {
        self.prune();
        let mut keys: Vec<String> = self.inner.active.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub async fn close_all(&self) {
        let keys: Vec<String> = self.inner.active.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.unsubscribe(&key).await;
        }
    }

    async fn replace(&self, key: &str) {
        if let Some((_, previous)) = self.inner.active.remove(key) {
            debug!(event = "stream.replaced", domain = "stream", key);
            previous.close_and_wait().await;
        }
    }

    async fn track(&self, sub: &Subscription) {
        self.prune();
        let displaced = self.inner.active.insert(sub.key().to_string(), sub.closer());
        if let Some(displaced) = displaced {
            displaced.close_and_wait().await;
        }
    }

    /// Drops registry entries whose connection already closed on its own.
    fn prune(&self) {
        self.inner.active.retain(|_, closer| !closer.is_closed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::subscription::ConnectionState;
    use crate::stream::subscription::tests::{After, Script, ScriptedSource, event_frame};

    #[tokio::test]
    async fn resubscribing_closes_the_previous_connection() {
        let source = ScriptedSource::new(vec![
            Script::Connect(vec![event_frame(1)], After::StayOpen),
            Script::Connect(vec![event_frame(2)], After::StayOpen),
        ]);
        let hub = StreamHub::new(source.clone());
        let request = StreamRequest::new("run-1:logs", "/workflows/runs/run-1/logs/stream");

        let mut first = hub.subscribe(request.clone()).await;
        assert!(first.next_event().await.is_some());

        let mut second = hub.subscribe(request).await;
        assert_eq!(first.status().state, ConnectionState::ClosedClean);
        assert!(first.next_event().await.is_none());
        assert_eq!(second.next_event().await.and_then(|e| e.id).as_deref(), Some("2"));
        assert_eq!(hub.active_keys(), vec!["run-1:logs".to_string()]);
        assert_eq!(source.requests().len(), 2);
    }

    #[tokio::test]
    async fn overlapping_resubscribes_leave_one_live_connection() {
        let source = ScriptedSource::new(Vec::new());
        let hub = StreamHub::new(source.clone());
        let request = StreamRequest::new("run-1:logs", "/workflows/runs/run-1/logs/stream");
        let first = hub.subscribe(request.clone()).await;

        let (a, b) = tokio::join!(hub.subscribe(request.clone()), hub.subscribe(request));
        assert_eq!(first.status().state, ConnectionState::ClosedClean);
        let open = [&a, &b]
            .iter()
            .filter(|sub| !sub.status().state.is_closed())
            .count();
        assert_eq!(open, 1);
        assert_eq!(hub.active_keys(), vec!["run-1:logs".to_string()]);
        assert_eq!(source.requests().len(), 3);
    }

    #[tokio::test]
    async fn finished_connections_are_pruned_on_subscribe() {
        let source = ScriptedSource::new(vec![Script::Connect(Vec::new(), After::End)]);
        let hub = StreamHub::new(source);
        let a = hub.subscribe(StreamRequest::new("a", "/a")).await;
        a.wait_for_status(|s| s.state.is_closed()).await;

        let _b = hub.subscribe(StreamRequest::new("b", "/b")).await;
        assert_eq!(hub.inner.active.len(), 1);
        assert!(hub.inner.active.contains_key("b"));
    }

    #[tokio::test]
    async fn unsubscribe_and_close_all() {
        let source = ScriptedSource::new(Vec::new());
        let hub = StreamHub::new(source);
        let a = hub.subscribe(StreamRequest::new("a", "/a")).await;
        let _b = hub.subscribe(StreamRequest::new("b", "/b")).await;
        assert_eq!(hub.active_keys(), vec!["a".to_string(), "b".to_string()]);

        assert!(hub.unsubscribe("a").await);
        assert!(!hub.unsubscribe("a").await);
        assert!(a.status().state.is_closed());

        hub.close_all().await;
        assert!(hub.active_keys().is_empty());
    }
}
