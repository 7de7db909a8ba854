//! Cooperative shutdown signal shared by the poller and the relays.

use tokio::sync::watch;

/// Sender side; flip to `true` to ask every loop to stop.
pub type ShutdownTrigger = watch::Sender<bool>;

/// Receiver side handed to long-running loops.
pub type ShutdownSignal = watch::Receiver<bool>;

pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    watch::channel(false)
}

pub fn is_requested(signal: &ShutdownSignal) -> bool {
    *signal.borrow()
}

/// Resolve once shutdown has been requested.
///
/// If the trigger is dropped without firing, this never resolves.
pub async fn requested(signal: &mut ShutdownSignal) {
    while !*signal.borrow_and_update() {
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_requested_resolves_after_trigger() {
        let (trigger, mut signal) = channel();
        assert!(!is_requested(&signal));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = trigger.send(true);
        });

        tokio::time::timeout(Duration::from_secs(2), requested(&mut signal))
            .await
            .unwrap();
        assert!(is_requested(&signal));
    }

    #[tokio::test]
    async fn test_dropped_trigger_never_resolves() {
        let (trigger, mut signal) = channel();
        drop(trigger);

        let waited = tokio::time::timeout(Duration::from_millis(30), requested(&mut signal)).await;
        assert!(waited.is_err());
    }
}
