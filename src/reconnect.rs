//! Automatic reconnection with capped exponential backoff
//!
//! A small state machine armed for the lifetime of a session. Transient
//! recognizer failures call [`ReconnectController::attempt`], which schedules a
//! single deferred retry; a confirmed (re)connection resets the counter; after
//! the retry budget is spent the controller disarms and publishes a terminal
//! error. Disarming synchronously invalidates any pending retry.

use crate::store::{CaptionStore, ConnectionStatus};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// First retry delay.
pub const BASE_DELAY_MS: u64 = 1000;
/// Ceiling for the doubling schedule.
pub const MAX_DELAY_MS: u64 = 30_000;
/// Retry budget before giving up.
pub const MAX_RETRIES: u32 = 10;

/// Backoff delay for the given 1-based attempt number:
/// 1s, 2s, 4s, 8s, 16s, then capped at 30s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(63);
    let delay = BASE_DELAY_MS.saturating_mul(1u64 << exp).min(MAX_DELAY_MS);
    Duration::from_millis(delay)
}

struct Inner {
    enabled: bool,
    attempt: u32,
    pending: Option<JoinHandle<()>>,
}

/// Retry scheduler for the recognition adapter.
///
/// The fired retry is delivered as a signal on the retry channel returned by
/// [`ReconnectController::new`]; the session context pumps those signals into
/// the adapter's `start()`. The controller never learns why a retry failed;
/// the adapter's own failure handling re-enters [`attempt`](Self::attempt).
pub struct ReconnectController {
    store: Arc<CaptionStore>,
    retry_tx: mpsc::UnboundedSender<()>,
    inner: Mutex<Inner>,
}

impl ReconnectController {
    pub fn new(store: Arc<CaptionStore>) -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let controller = Arc::new(Self {
            store,
            retry_tx,
            inner: Mutex::new(Inner {
                enabled: false,
                attempt: 0,
                pending: None,
            }),
        });
        (controller, retry_rx)
    }

    /// Arm the controller and zero the attempt counter.
    pub fn enable(&self) {
        let mut inner = self.lock();
        inner.enabled = true;
        inner.attempt = 0;
    }

    /// Disarm, zero the counter and cancel any pending scheduled retry.
    ///
    /// A retry task that already woke up re-checks the armed flag under the
    /// same lock, so a retry can never fire after this returns.
    pub fn disable(&self) {
        let mut inner = self.lock();
        inner.enabled = false;
        inner.attempt = 0;
        if let Some(pending) = inner.pending.take() {
            pending.abort();
        }
    }

    /// Zero the counter without disarming. Called on a confirmed connection.
    pub fn reset_backoff(&self) {
        self.lock().attempt = 0;
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn attempt_count(&self) -> u32 {
        self.lock().attempt
    }

    /// Schedule the next retry, or give up once the budget is spent.
    pub fn attempt(self: &Arc<Self>) {
        let (attempt, delay) = {
            let mut inner = self.lock();
            if !inner.enabled {
                return;
            }
            if inner.attempt >= MAX_RETRIES {
                inner.enabled = false;
                drop(inner);
                warn!("Giving up after {} reconnection attempts", MAX_RETRIES);
                self.store.set_status(
                    ConnectionStatus::Error,
                    &format!("Reconnection failed after {} attempts.", MAX_RETRIES),
                );
                return;
            }
            inner.attempt += 1;
            let attempt = inner.attempt;
            let delay = backoff_delay(attempt);
            // Anchor the deadline now, not at the task's first poll
            let deadline = tokio::time::Instant::now() + delay;

            let this = Arc::clone(self);
            let handle = tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                let still_armed = {
                    let mut inner = this.lock();
                    inner.pending = None;
                    inner.enabled
                };
                if still_armed {
                    let _ = this.retry_tx.send(());
                }
            });
            if let Some(old) = inner.pending.replace(handle) {
                old.abort();
            }
            (attempt, delay)
        };

        debug!(attempt, delay_ms = delay.as_millis() as u64, "Scheduled reconnection attempt");
        self.store.set_status(
            ConnectionStatus::Reconnecting,
            &format!("Reconnecting (attempt {})...", attempt),
        );
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, Duration};

    fn setup() -> (Arc<CaptionStore>, Arc<ReconnectController>, mpsc::UnboundedReceiver<()>) {
        let store = Arc::new(CaptionStore::new());
        let (controller, retry_rx) = ReconnectController::new(store.clone());
        (store, controller, retry_rx)
    }

    async fn settle() {
        // Let the woken retry task run to completion
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn backoff_schedule_doubles_then_caps() {
        let expected = [
            1_000u64, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000, 30_000, 30_000,
        ];
        for (i, &ms) in expected.iter().enumerate() {
            assert_eq!(backoff_delay(i as u32 + 1), Duration::from_millis(ms));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_is_a_noop_while_disarmed() {
        let (store, controller, mut retry_rx) = setup();
        controller.attempt();
        assert_eq!(controller.attempt_count(), 0);
        advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(retry_rx.try_recv().is_err());
        assert_eq!(store.snapshot().connection_status, ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_fires_after_the_scheduled_delay() {
        let (store, controller, mut retry_rx) = setup();
        controller.enable();
        controller.attempt();
        assert_eq!(controller.attempt_count(), 1);
        let state = store.snapshot();
        assert_eq!(state.connection_status, ConnectionStatus::Reconnecting);
        assert_eq!(state.error_message, "Reconnecting (attempt 1)...");

        advance(Duration::from_millis(999)).await;
        settle().await;
        assert!(retry_rx.try_recv().is_err());

        advance(Duration::from_millis(2)).await;
        settle().await;
        assert!(retry_rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn delays_follow_the_backoff_schedule() {
        let (_store, controller, mut retry_rx) = setup();
        controller.enable();
        let expected_ms = [1_000u64, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000];
        for (i, &ms) in expected_ms.iter().enumerate() {
            controller.attempt();
            assert_eq!(controller.attempt_count(), i as u32 + 1);
            advance(Duration::from_millis(ms - 1)).await;
            settle().await;
            assert!(retry_rx.try_recv().is_err(), "retry {} fired early", i + 1);
            advance(Duration::from_millis(2)).await;
            settle().await;
            assert!(retry_rx.try_recv().is_ok(), "retry {} never fired", i + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_retry_budget() {
        let (store, controller, mut retry_rx) = setup();
        controller.enable();
        for _ in 0..MAX_RETRIES {
            controller.attempt();
            advance(Duration::from_secs(31)).await;
            settle().await;
            assert!(retry_rx.try_recv().is_ok());
        }
        assert_eq!(controller.attempt_count(), MAX_RETRIES);

        controller.attempt();
        let state = store.snapshot();
        assert_eq!(state.connection_status, ConnectionStatus::Error);
        assert!(state.error_message.contains("10 attempts"));
        assert!(!controller.is_enabled());

        // Further attempts no-op until re-armed
        controller.attempt();
        advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(retry_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn disable_cancels_a_pending_retry() {
        let (_store, controller, mut retry_rx) = setup();
        controller.enable();
        controller.attempt();
        controller.disable();
        assert_eq!(controller.attempt_count(), 0);

        advance(Duration::from_secs(120)).await;
        settle().await;
        assert!(retry_rx.try_recv().is_err());
        assert_eq!(controller.attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_counter_without_disarming() {
        let (_store, controller, mut retry_rx) = setup();
        controller.enable();
        controller.attempt();
        advance(Duration::from_secs(2)).await;
        settle().await;
        let _ = retry_rx.try_recv();

        controller.reset_backoff();
        assert_eq!(controller.attempt_count(), 0);
        assert!(controller.is_enabled());

        // Next failure starts the schedule over at the base delay
        controller.attempt();
        advance(Duration::from_millis(1001)).await;
        settle().await;
        assert!(retry_rx.try_recv().is_ok());
    }
}
