//! Caption broadcast receiver
//!
//! Runs in overlay contexts: applies replicated caption and style snapshots
//! from the bus into local stores and tracks producer liveness. Any message,
//! including pings, counts as a sign of life; the producer is considered gone
//! once [`ALIVE_TIMEOUT_MS`] passes without one.

use super::{BroadcastMessage, MessageBus};
use crate::store::{CaptionStore, ReplicaState};
use crate::style::StyleStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Producer liveness window.
pub const ALIVE_TIMEOUT_MS: u64 = 5000;

/// How long `start` probes for an active producer before reporting none.
const FIRST_MESSAGE_TIMEOUT_MS: u64 = 2000;

/// Applies broadcast messages to a local store/style pair.
pub struct BroadcastReceiver {
    store: Arc<CaptionStore>,
    style: Arc<StyleStore>,
    bus: Arc<dyn MessageBus>,
    last_message: Arc<Mutex<Option<tokio::time::Instant>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastReceiver {
    pub fn new(store: Arc<CaptionStore>, style: Arc<StyleStore>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            store,
            style,
            bus,
            last_message: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
        }
    }

    /// Start receiving and probe for an active producer.
    ///
    /// Returns whether any message arrived within the probe window. Either
    /// way the receiver keeps listening until [`stop`](Self::stop) is called.
    pub async fn start(&self) -> bool {
        {
            let mut task = self.lock_task();
            if task.is_some() {
                return true;
            }
            let (first_tx, first_rx) = oneshot::channel();
            *task = Some(tokio::spawn(run_receiver(
                self.bus.subscribe(),
                self.store.clone(),
                self.style.clone(),
                self.last_message.clone(),
                first_tx,
            )));
            drop(task);

            let probe = tokio::time::timeout(
                Duration::from_millis(FIRST_MESSAGE_TIMEOUT_MS),
                first_rx,
            );
            match probe.await {
                Ok(Ok(())) => {
                    info!("Broadcast producer detected");
                    true
                }
                _ => {
                    debug!("No broadcast activity within the probe window");
                    false
                }
            }
        }
    }

    /// Stop receiving and forget the liveness timestamp.
    pub fn stop(&self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
        }
        *self.lock_last_message() = None;
    }

    /// Whether a producer message arrived within the liveness window.
    pub fn is_receiving(&self) -> bool {
        match *self.lock_last_message() {
            Some(at) => at.elapsed() < Duration::from_millis(ALIVE_TIMEOUT_MS),
            None => false,
        }
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_last_message(&self) -> std::sync::MutexGuard<'_, Option<tokio::time::Instant>> {
        match self.last_message.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for BroadcastReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_receiver(
    mut rx: tokio::sync::broadcast::Receiver<BroadcastMessage>,
    store: Arc<CaptionStore>,
    style: Arc<StyleStore>,
    last_message: Arc<Mutex<Option<tokio::time::Instant>>>,
    first_tx: oneshot::Sender<()>,
) {
    let mut first_tx = Some(first_tx);
    loop {
        let message = match rx.recv().await {
            Ok(message) => message,
            // Missed messages are fine; the next snapshot supersedes them.
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        if let Ok(mut guard) = last_message.lock() {
            *guard = Some(tokio::time::Instant::now());
        }
        if let Some(tx) = first_tx.take() {
            let _ = tx.send(());
        }

        match message {
            BroadcastMessage::SubtitleUpdate {
                lines,
                partial_text,
                connection_status,
                error_message,
                last_activity_timestamp,
            } => {
                store.apply_replica(ReplicaState {
                    lines,
                    partial_text,
                    connection_status,
                    error_message,
                    last_activity_timestamp,
                });
            }
            BroadcastMessage::StyleUpdate { style: new_style } => {
                style.set(new_style);
            }
            BroadcastMessage::Ping => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::InProcessBus;
    use crate::store::{CaptionLine, ConnectionStatus};
    use crate::style::SubtitleStyle;

    fn build_receiver() -> (BroadcastReceiver, Arc<CaptionStore>, Arc<StyleStore>, Arc<dyn MessageBus>) {
        let store = Arc::new(CaptionStore::new());
        let style = Arc::new(StyleStore::new());
        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        let receiver = BroadcastReceiver::new(store.clone(), style.clone(), bus.clone());
        (receiver, store, style, bus)
    }

    fn subtitle_update(partial: &str) -> BroadcastMessage {
        BroadcastMessage::SubtitleUpdate {
            lines: vec![CaptionLine {
                id: "line-3".to_string(),
                text: "from the producer".to_string(),
                is_final: true,
                timestamp: 1234,
            }],
            partial_text: partial.to_string(),
            connection_status: ConnectionStatus::Connected,
            error_message: String::new(),
            last_activity_timestamp: 1234,
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn probe_reports_an_active_producer() {
        let (receiver, _store, _style, bus) = build_receiver();
        let bus_clone = bus.clone();
        let probe = tokio::spawn(async move {
            // Ping arriving mid-probe resolves it early
            tokio::time::sleep(Duration::from_millis(500)).await;
            bus_clone.send(BroadcastMessage::Ping);
        });
        assert!(receiver.start().await);
        probe.await.unwrap();
        assert!(receiver.is_receiving());
        receiver.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn probe_times_out_on_a_silent_channel_but_keeps_listening() {
        let (receiver, store, _style, bus) = build_receiver();
        assert!(!receiver.start().await);
        assert!(!receiver.is_receiving());

        // Producer shows up later
        bus.send(subtitle_update("late"));
        settle().await;
        assert!(receiver.is_receiving());
        assert_eq!(store.snapshot().partial_text, "late");
        receiver.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn subtitle_updates_replace_local_state_wholesale() {
        let (receiver, store, _style, bus) = build_receiver();
        store.add_final_line("stale local line");
        receiver.start().await;
        bus.send(subtitle_update("in progress"));
        settle().await;

        let state = store.snapshot();
        assert_eq!(state.lines.len(), 1);
        assert_eq!(state.lines[0].id, "line-3");
        assert_eq!(state.lines[0].text, "from the producer");
        assert_eq!(state.partial_text, "in progress");
        assert_eq!(state.connection_status, ConnectionStatus::Connected);
        receiver.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn style_updates_apply_to_the_local_style_store() {
        let (receiver, _store, style, bus) = build_receiver();
        receiver.start().await;
        bus.send(BroadcastMessage::StyleUpdate {
            style: SubtitleStyle {
                font_size: 72,
                ..SubtitleStyle::default()
            },
        });
        settle().await;
        assert_eq!(style.get().font_size, 72);
        receiver.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_expires_without_messages_and_recovers_with_them() {
        let (receiver, _store, _style, bus) = build_receiver();
        receiver.start().await;
        bus.send(BroadcastMessage::Ping);
        settle().await;
        assert!(receiver.is_receiving());

        // Just inside the window
        tokio::time::advance(Duration::from_millis(ALIVE_TIMEOUT_MS - 1)).await;
        assert!(receiver.is_receiving());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(!receiver.is_receiving());

        // A ping alone is enough to come back
        bus.send(BroadcastMessage::Ping);
        settle().await;
        assert!(receiver.is_receiving());
        receiver.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_resets_liveness() {
        let (receiver, _store, _style, bus) = build_receiver();
        receiver.start().await;
        bus.send(BroadcastMessage::Ping);
        settle().await;
        assert!(receiver.is_receiving());
        receiver.stop();
        assert!(!receiver.is_receiving());
    }
}
