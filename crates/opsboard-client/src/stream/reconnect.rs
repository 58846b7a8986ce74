use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::abort::AbortSignal;

use super::event::RunEvent;
use super::source::{EventSource, StreamRequest};
use super::subscription::{ConnectionState, PumpExit, SubscriptionStatus, finish, pump};

/// Bounded exponential backoff between reconnection attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Consecutive attempts allowed without a delivered event in between.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound for computed backoff.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_initial_backoff_ms() -> u64 {
    1_000
}

const fn default_backoff_factor() -> f64 {
    2.0
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::exponential(
            default_max_retries(),
            default_initial_backoff_ms(),
            default_backoff_factor(),
        )
    }
}

impl ReconnectPolicy {
    /// Never reconnects.
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }

    pub fn exponential(max_retries: u32, initial_backoff_ms: u64, backoff_factor: f64) -> Self {
        let initial = if initial_backoff_ms == 0 {
            default_initial_backoff_ms()
        } else {
            initial_backoff_ms
        };
        let factor = if backoff_factor <= 0.0 {
            default_backoff_factor()
        } else {
            backoff_factor
        };
        Self {
            max_retries,
            initial_backoff_ms: initial,
            backoff_factor: factor,
            max_backoff_ms: default_max_backoff_ms(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_backoff_ms(mut self, max_backoff_ms: u64) -> Self {
        self.max_backoff_ms = max_backoff_ms.max(1);
        self
    }

    pub fn can_retry(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }

    pub fn backoff_duration(&self, attempts: u32) -> Duration {
        if self.max_retries == 0 {
            return Duration::ZERO;
        }
        let exp = self.backoff_factor.powi(attempts.min(i32::MAX as u32) as i32);
        let base = (self.initial_backoff_ms as f64 * exp).round();
        let cap = self.max_backoff_ms.max(1);
        let millis = if base.is_finite() && base < cap as f64 {
            base as u64
        } else {
            cap
        };
        Duration::from_millis(millis)
    }
}

/// Connection driver that re-opens dropped streams from the last cursor.
pub(crate) async fn run_reconnecting(
    source: Arc<dyn EventSource>,
    mut request: StreamRequest,
    policy: ReconnectPolicy,
    tx: mpsc::Sender<RunEvent>,
    status: watch::Sender<SubscriptionStatus>,
    mut signal: AbortSignal,
) {
    let mut attempts = 0_u32;
    loop {
        let (exit, delivered) = pump(&source, &request, &tx, &status, &mut signal).await;
        let err = match exit {
            PumpExit::Dropped(err) => err,
            other => return finish(&status, &request.key, other),
        };
        if delivered > 0 {
            attempts = 0;
        }
        if !err.is_retryable() || !policy.can_retry(attempts) {
            return finish(&status, &request.key, PumpExit::Dropped(err));
        }

        let delay = policy.backoff_duration(attempts);
        attempts += 1;
        warn!(
            event = "stream.reconnecting",
            domain = "stream",
            key = %request.key,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err.message
        );
        status.send_modify(|s| {
            s.state = ConnectionState::Connecting;
            s.disconnected = true;
            s.last_error = Some(err);
            s.reconnects += 1;
        });

        tokio::select! {
            biased;
            _ = signal.aborted() => return finish(&status, &request.key, PumpExit::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        if tx.is_closed() {
            return finish(&status, &request.key, PumpExit::ConsumerGone);
        }
        if let Some(cursor) = status.borrow().cursor.clone() {
            request.last_event_id = Some(cursor);
        }
    }
}
