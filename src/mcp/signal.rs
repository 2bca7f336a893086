//! One-shot broadcast signals.
//!
//! A [`Trigger`] fires at most once; any number of [`Signal`] observers can
//! poll it or wait for it. Used for request cancellation, connection close
//! and server shutdown.

use tokio::sync::watch;

/// The firing side of a signal.
#[derive(Debug)]
pub struct Trigger {
    tx: watch::Sender<bool>,
}

impl Trigger {
    /// Creates an unfired trigger.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Fires the signal. Repeated calls are no-ops.
    pub fn fire(&self) {
        self.tx.send_if_modified(|fired| !std::mem::replace(fired, true));
    }

    /// Re-arms the trigger so it can fire again.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    /// Whether the signal has fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns an observer of this trigger.
    #[must_use]
    pub fn signal(&self) -> Signal {
        Signal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}

/// The observing side of a signal.
#[derive(Debug, Clone)]
pub struct Signal {
    rx: watch::Receiver<bool>,
}

impl Signal {
    /// Whether the signal has fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes once the signal fires.
    ///
    /// Never completes if the trigger is dropped without firing.
    pub async fn fired(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|fired| *fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fired_completes_after_fire() {
        let trigger = Trigger::new();
        let signal = trigger.signal();
        assert!(!signal.is_fired());

        let waiter = tokio::spawn(async move { signal.fired().await });
        trigger.fire();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("signal should complete")
            .unwrap();
    }

    #[tokio::test]
    async fn late_observers_see_fired_state() {
        let trigger = Trigger::new();
        trigger.fire();
        trigger.fire();
        let signal = trigger.signal();
        assert!(signal.is_fired());
        tokio::time::timeout(Duration::from_millis(100), signal.fired())
            .await
            .expect("already fired");
    }

    #[tokio::test]
    async fn dropped_trigger_never_fires() {
        let trigger = Trigger::new();
        let signal = trigger.signal();
        drop(trigger);
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.fired()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn reset_rearms() {
        let trigger = Trigger::new();
        trigger.fire();
        assert!(trigger.is_fired());
        trigger.reset();
        assert!(!trigger.is_fired());
    }
}
