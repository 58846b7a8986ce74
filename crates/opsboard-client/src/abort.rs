use std::time::Duration;

use tokio::sync::watch;

/// Handle used to request cancellation of an in-flight call or subscription.
///
/// Aborting is idempotent.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

/// Receiving side of an [`AbortHandle`].
#[derive(Clone, Debug)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

/// Creates a connected handle/signal pair.
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx }, AbortSignal { rx })
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Aborts after `after` elapses, unless aborted earlier.
    ///
    /// This is how callers impose a deadline on a client call.
    pub fn abort_after(&self, after: Duration) {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            handle.abort();
        });
    }
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once abort was requested. Never resolves if every handle is
    /// dropped without aborting.
    pub async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn abort_is_observed_and_idempotent() {
        let (handle, mut signal) = abort_pair();
        assert!(!signal.is_aborted());
        handle.abort();
        handle.abort();
        signal.aborted().await;
        assert!(signal.is_aborted());
        assert!(handle.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_after_fires_on_deadline() {
        let (handle, mut signal) = abort_pair();
        handle.abort_after(Duration::from_secs(5));
        let waited = tokio::time::timeout(Duration::from_secs(6), signal.aborted()).await;
        assert!(waited.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_never_aborts() {
        let (handle, mut signal) = abort_pair();
        drop(handle);
        let waited = tokio::time::timeout(Duration::from_secs(1), signal.aborted()).await;
        assert!(waited.is_err());
    }
}
