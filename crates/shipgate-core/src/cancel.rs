//! Cooperative cancellation shared by gate waits and health polls.
//!
//! Cancellation is a `watch<bool>` channel owned by the pipeline handle.
//! Waits select on [`cancelled`] so an operator abort interrupts them
//! without holding any lock.

use tokio::sync::watch;

/// Resolve only when cancellation is requested.
///
/// If the sender has been dropped, cancellation can no longer arrive and
/// this future pends forever, so callers' other select branches win.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Non-blocking check of the current cancellation flag.
pub(crate) fn is_cancelled(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_resolves_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        let wait = tokio::spawn(async move {
            cancelled(&mut rx).await;
        });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), wait)
            .await
            .expect("cancelled future should resolve")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_pends_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let timed_out =
            tokio::time::timeout(Duration::from_secs(5), cancelled(&mut rx)).await;
        assert!(timed_out.is_err(), "closed channel must never cancel");
    }

    #[tokio::test]
    async fn test_is_cancelled() {
        let (tx, rx) = watch::channel(false);
        assert!(!is_cancelled(&rx));
        tx.send(true).unwrap();
        assert!(is_cancelled(&rx));
    }
}
