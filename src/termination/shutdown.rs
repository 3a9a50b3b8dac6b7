//! Shutdown signal shared by every component that waits
//!
//! A thin wrapper over a `tokio::sync::watch` channel holding a single
//! boolean. Once triggered it stays triggered for the rest of the run.

use tokio::sync::watch;

/// Sending half, owned by the termination controller
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Receiving half; cheap to clone into every worker
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    /// Returns `true` if this call flipped the signal
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        channel().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested
    ///
    /// If the trigger is dropped without firing this never resolves.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_waiters() {
        let (trigger, signal) = channel();
        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.triggered().await }
        });

        assert!(!signal.is_triggered());
        assert!(trigger.trigger());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_second_trigger_reports_no_change() {
        let (trigger, _signal) = channel();
        assert!(trigger.trigger());
        assert!(!trigger.trigger());
        assert!(trigger.is_triggered());
    }

    #[tokio::test]
    async fn test_never_does_not_resolve() {
        let signal = ShutdownSignal::never();
        let res = tokio::time::timeout(Duration::from_millis(50), signal.triggered()).await;
        assert!(res.is_err());
        assert!(!signal.is_triggered());
    }

    #[tokio::test]
    async fn test_subscribe_after_trigger_sees_state() {
        let (trigger, _signal) = channel();
        trigger.trigger();
        let late = trigger.subscribe();
        assert!(late.is_triggered());
        late.triggered().await;
    }
}
