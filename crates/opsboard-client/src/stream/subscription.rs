use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt as _;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::abort::{AbortHandle, AbortSignal, abort_pair};
use crate::errors::{ErrorKind, TypedError, map_transport_error};

use super::event::RunEvent;
use super::reconnect::{ReconnectPolicy, run_reconnecting};
use super::source::{EventSource, StreamRequest};

/// Connection lifecycle of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    /// Closed because the consumer asked for it.
    ClosedClean,
    /// Closed because the connection failed or dropped.
    ClosedError,
}

impl ConnectionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ClosedClean | Self::ClosedError)
    }
}

/// A frame that could not be decoded and was skipped.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamDiagnostic {
    pub message: String,
    /// Leading part of the offending payload.
    pub excerpt: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of a subscription as seen by its consumer.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionStatus {
    pub state: ConnectionState,
    pub disconnected: bool,
    pub last_error: Option<TypedError>,
    pub parse_errors: u64,
    pub last_parse_error: Option<StreamDiagnostic>,
    /// Id of the last event seen; used to resume.
    pub cursor: Option<String>,
    pub delivered: u64,
    pub reconnects: u32,
}

impl Default for SubscriptionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            disconnected: false,
            last_error: None,
            parse_errors: 0,
            last_parse_error: None,
            cursor: None,
            delivered: 0,
            reconnects: 0,
        }
    }
}

/// Tunables for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionOptions {
    /// Capacity of the channel between the connection task and the consumer.
    pub buffer_capacity: usize,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: 128,
        }
    }
}

/// Teardown handle detached from the consumer side of a subscription.
#[derive(Clone)]
pub struct SubscriptionCloser {
    abort: AbortHandle,
    status: watch::Receiver<SubscriptionStatus>,
}

impl SubscriptionCloser {
    /// Requests teardown. Safe to call any number of times.
    pub fn close(&self) {
        self.abort.abort();
    }

    /// Requests teardown and waits until the connection is released.
    pub async fn close_and_wait(&self) {
        self.abort.abort();
        let mut status = self.status.clone();
        let _ = status.wait_for(|s| s.state.is_closed()).await;
    }

    pub fn is_closed(&self) -> bool {
        self.status.borrow().state.is_closed()
    }
}

/// Live, ordered event feed for one stream key.
///
/// Dropping the subscription tears the connection down.
pub struct Subscription {
    key: String,
    rx: mpsc::Receiver<RunEvent>,
    status: watch::Receiver<SubscriptionStatus>,
    abort: AbortHandle,
}

impl Subscription {
    /// Opens a subscription that does not reconnect. After a drop it stays
    /// in `ClosedError` with `disconnected` set.
    pub fn open(
        source: Arc<dyn EventSource>,
        request: StreamRequest,
        options: SubscriptionOptions,
    ) -> Self {
        Self::spawn(request, options, move |request, tx, status, signal| async move {
            run_once(source, request, tx, status, signal).await;
        })
    }

    /// Opens a subscription that reconnects with backoff after retryable
    /// drops, resuming from the last seen event id.
    pub fn open_reconnecting(
        source: Arc<dyn EventSource>,
        request: StreamRequest,
        policy: ReconnectPolicy,
        options: SubscriptionOptions,
    ) -> Self {
        Self::spawn(request, options, move |request, tx, status, signal| async move {
            run_reconnecting(source, request, policy, tx, status, signal).await;
        })
    }

    fn spawn<F, Fut>(request: StreamRequest, options: SubscriptionOptions, driver: F) -> Self
    where
        F: FnOnce(
            StreamRequest,
            mpsc::Sender<RunEvent>,
            watch::Sender<SubscriptionStatus>,
            AbortSignal,
        ) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(options.buffer_capacity.max(1));
        let (status_tx, status_rx) = watch::channel(SubscriptionStatus::default());
        let (abort, signal) = abort_pair();
        let key = request.key.clone();
        tokio::spawn(driver(request, tx, status_tx, signal));
        Self {
            key,
            rx,
            status: status_rx,
            abort,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next event in arrival order. `None` once the subscription is closed
    /// and every buffered event has been consumed.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.rx.recv().await
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status.borrow().clone()
    }

    /// Waits until `predicate` holds for the status and returns that status.
    pub async fn wait_for_status(
        &self,
        predicate: impl FnMut(&SubscriptionStatus) -> bool,
    ) -> SubscriptionStatus {
        let mut status = self.status.clone();
        if let Ok(current) = status.wait_for(predicate).await {
            return current.clone();
        }
        status.borrow().clone()
    }

    pub fn closer(&self) -> SubscriptionCloser {
        SubscriptionCloser {
            abort: self.abort.clone(),
            status: self.status.clone(),
        }
    }

    /// Tears the connection down. Idempotent.
    pub fn close(&self) {
        self.abort.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

/// How one connection attempt ended.
pub(crate) enum PumpExit {
    Cancelled,
    ConsumerGone,
    Dropped(TypedError),
}

/// Drives one connection: connect, then forward decoded events in order
/// until cancelled or the transport ends. Returns how it ended and how many
/// events were delivered.
pub(crate) async fn pump(
    source: &Arc<dyn EventSource>,
    request: &StreamRequest,
    tx: &mpsc::Sender<RunEvent>,
    status: &watch::Sender<SubscriptionStatus>,
    signal: &mut AbortSignal,
) -> (PumpExit, u64) {
    status.send_modify(|s| s.state = ConnectionState::Connecting);

    let connected = tokio::select! {
        biased;
        _ = signal.aborted() => return (PumpExit::Cancelled, 0),
        connected = source.connect(request) => connected,
    };
    let mut frames = match connected {
        Ok(frames) => frames,
        Err(err) => return (PumpExit::Dropped(err), 0),
    };
    status.send_modify(|s| {
        s.state = ConnectionState::Open;
        s.disconnected = false;
    });
    debug!(event = "stream.open", domain = "stream", key = %request.key);

    let mut delivered = 0_u64;
    loop {
        let next = tokio::select! {
            biased;
            _ = signal.aborted() => return (PumpExit::Cancelled, delivered),
            next = frames.next() => next,
        };
        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => return (PumpExit::Dropped(map_transport_error(&err)), delivered),
            None => {
                return (
                    PumpExit::Dropped(TypedError::new(
                        ErrorKind::NetworkError,
                        "event stream ended by server",
                    )),
                    delivered,
                );
            }
        };
        if let Some(id) = &frame.id {
            status.send_modify(|s| s.cursor = Some(id.clone()));
        }
        if frame.data.trim().is_empty() {
            continue;
        }

        let event = match RunEvent::from_frame(&frame) {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    event = "stream.event_malformed",
                    domain = "stream",
                    key = %request.key,
                    error = %err
                );
                let excerpt: String = frame.data.chars().take(120).collect();
                status.send_modify(|s| {
                    s.parse_errors += 1;
                    s.last_parse_error = Some(StreamDiagnostic {
                        message: err.to_string(),
                        excerpt,
                        at: Utc::now(),
                    });
                });
                continue;
            }
        };

        let cursor = event.id.clone();
        let sent = tokio::select! {
            biased;
            _ = signal.aborted() => return (PumpExit::Cancelled, delivered),
            sent = tx.send(event) => sent.is_ok(),
        };
        if !sent {
            return (PumpExit::ConsumerGone, delivered);
        }
        delivered += 1;
        status.send_modify(|s| {
            s.delivered += 1;
            if cursor.is_some() {
                s.cursor = cursor;
            }
        });
    }
}

/// Records the terminal state for an exit reason.
pub(crate) fn finish(status: &watch::Sender<SubscriptionStatus>, key: &str, exit: PumpExit) {
    match exit {
        PumpExit::Cancelled | PumpExit::ConsumerGone => {
            debug!(event = "stream.closed", domain = "stream", key, clean = true);
            status.send_modify(|s| s.state = ConnectionState::ClosedClean);
        }
        PumpExit::Dropped(err) => {
            warn!(
                event = "stream.closed",
                domain = "stream",
                key,
                clean = false,
                kind = err.kind.as_str(),
                error = %err.message
            );
            status.send_modify(|s| {
                s.state = ConnectionState::ClosedError;
                s.disconnected = true;
                s.last_error = Some(err);
            });
        }
    }
}

async fn run_once(
    source: Arc<dyn EventSource>,
    request: StreamRequest,
    tx: mpsc::Sender<RunEvent>,
    status: watch::Sender<SubscriptionStatus>,
    mut signal: AbortSignal,
) {
    let (exit, _) = pump(&source, &request, &tx, &status, &mut signal).await;
    finish(&status, &request.key, exit);
}
