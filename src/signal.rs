use std::sync::Arc;
use tokio::sync::watch;

/// Cancellation flag shared between a session and its connector run.
///
/// Firing is idempotent: only the first `cancel` flips the flag and wakes
/// waiters, every later call is a no-op. A fresh signal is made for each run.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Returns true if this call is the one that fired the signal.
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has fired, immediately if it already has.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in `self`, so this can't see a closed channel
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cancel_is_idempotent() {
        let signal = StopSignal::new();
        assert!(!signal.is_cancelled());
        assert!(signal.cancel());
        assert!(signal.is_cancelled());
        assert!(!signal.cancel());
        assert!(!signal.clone().cancel());
        assert!(signal.is_cancelled());
    }

    #[test]
    fn fresh_signals_are_independent() {
        let old = StopSignal::new();
        old.cancel();
        let new = StopSignal::new();
        assert!(!new.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_wakes_waiters() {
        let signal = StopSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        signal.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();

        // already fired, resolves straight away
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .unwrap();
    }
}
