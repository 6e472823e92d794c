//! Caption broadcast producer
//!
//! Replicates caption state from the producing context to overlay contexts
//! over a message bus. Line and status changes go out immediately; partial
//! text and other minor updates are throttled to at most one send per
//! [`THROTTLE_MS`] window with a trailing flush, so rapid hypothesis churn
//! cannot flood receivers. A periodic ping keeps liveness observable even
//! when no captions are flowing.

mod bus;
mod receiver;

pub use bus::{InProcessBus, MessageBus};
pub use receiver::BroadcastReceiver;

use crate::store::{CaptionLine, CaptionStore, ConnectionStatus, StoreChange};
use crate::style::{StyleStore, SubtitleStyle};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Logical channel name shared by producing and receiving contexts.
pub const CHANNEL_NAME: &str = "livesubs";

/// Minimum spacing between minor (partial-text) updates.
pub const THROTTLE_MS: u64 = 200;

/// Heartbeat interval while broadcasting.
pub const PING_INTERVAL_MS: u64 = 3000;

/// Messages carried on the broadcast channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BroadcastMessage {
    /// Full caption state snapshot
    #[serde(rename = "subtitle-update")]
    SubtitleUpdate {
        lines: Vec<CaptionLine>,
        #[serde(rename = "partialText")]
        partial_text: String,
        #[serde(rename = "connectionStatus")]
        connection_status: ConnectionStatus,
        #[serde(rename = "errorMessage")]
        error_message: String,
        #[serde(rename = "lastActivityTimestamp")]
        last_activity_timestamp: i64,
    },
    /// Full style snapshot
    #[serde(rename = "style-update")]
    StyleUpdate { style: SubtitleStyle },
    /// Heartbeat
    #[serde(rename = "ping")]
    Ping,
}

impl BroadcastMessage {
    fn subtitle_update(store: &CaptionStore) -> Self {
        let state = store.snapshot();
        BroadcastMessage::SubtitleUpdate {
            lines: state.lines,
            partial_text: state.partial_text,
            connection_status: state.connection_status,
            error_message: state.error_message,
            last_activity_timestamp: state.last_activity_timestamp,
        }
    }
}

/// Replicates store and style changes onto the bus.
pub struct BroadcastProducer {
    store: Arc<CaptionStore>,
    style: Arc<StyleStore>,
    bus: Arc<dyn MessageBus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastProducer {
    pub fn new(store: Arc<CaptionStore>, style: Arc<StyleStore>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            store,
            style,
            bus,
            task: Mutex::new(None),
        }
    }

    /// Start broadcasting. No-op when already running.
    pub fn start(&self) {
        let mut task = self.lock_task();
        if task.is_some() {
            return;
        }
        info!(channel = CHANNEL_NAME, "Broadcast producer starting");
        *task = Some(tokio::spawn(run_producer(
            self.store.clone(),
            self.style.clone(),
            self.bus.clone(),
        )));
    }

    /// Stop broadcasting and drop any pending throttled update.
    pub fn stop(&self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
            info!("Broadcast producer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_task().is_some()
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for BroadcastProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_producer(store: Arc<CaptionStore>, style: Arc<StyleStore>, bus: Arc<dyn MessageBus>) {
    let mut changes = store.subscribe();
    let mut style_rx = style.subscribe();

    // Receivers joining later catch up from these initial snapshots.
    bus.send(BroadcastMessage::subtitle_update(&store));
    bus.send(BroadcastMessage::StyleUpdate { style: style.get() });

    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + Duration::from_millis(PING_INTERVAL_MS),
        Duration::from_millis(PING_INTERVAL_MS),
    );

    // Leading-edge throttle for minor updates: the first one in a window goes
    // out immediately, later ones collapse into a single trailing send.
    let mut throttle_deadline: Option<tokio::time::Instant> = None;
    let mut pending_minor = false;

    loop {
        tokio::select! {
            change = changes.recv() => {
                let change = match change {
                    Ok(change) => change,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Broadcast producer lagged, resending snapshot");
                        StoreChange::Lines
                    }
                    Err(RecvError::Closed) => break,
                };
                match change {
                    StoreChange::Lines | StoreChange::Status => {
                        throttle_deadline = None;
                        pending_minor = false;
                        bus.send(BroadcastMessage::subtitle_update(&store));
                    }
                    StoreChange::Partial | StoreChange::Meta => {
                        if throttle_deadline.is_none() {
                            bus.send(BroadcastMessage::subtitle_update(&store));
                            throttle_deadline = Some(
                                tokio::time::Instant::now() + Duration::from_millis(THROTTLE_MS),
                            );
                        } else {
                            pending_minor = true;
                        }
                    }
                }
            }
            changed = style_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let style = style_rx.borrow_and_update().clone();
                bus.send(BroadcastMessage::StyleUpdate { style });
            }
            _ = ping.tick() => {
                bus.send(BroadcastMessage::Ping);
            }
            _ = sleep_until_opt(throttle_deadline), if throttle_deadline.is_some() => {
                if pending_minor {
                    // Flushing restarts the window, keeping sustained churn at
                    // one send per window rather than two.
                    pending_minor = false;
                    bus.send(BroadcastMessage::subtitle_update(&store));
                    throttle_deadline = Some(
                        tokio::time::Instant::now() + Duration::from_millis(THROTTLE_MS),
                    );
                } else {
                    throttle_deadline = None;
                }
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ConnectionStatus;

    fn build_producer() -> (
        BroadcastProducer,
        Arc<CaptionStore>,
        Arc<StyleStore>,
        tokio::sync::broadcast::Receiver<BroadcastMessage>,
    ) {
        let store = Arc::new(CaptionStore::new());
        let style = Arc::new(StyleStore::new());
        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        let rx = bus.subscribe();
        let producer = BroadcastProducer::new(store.clone(), style.clone(), bus);
        (producer, store, style, rx)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn drain_subtitle_updates(
        rx: &mut tokio::sync::broadcast::Receiver<BroadcastMessage>,
    ) -> Vec<BroadcastMessage> {
        let mut updates = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if matches!(msg, BroadcastMessage::SubtitleUpdate { .. }) {
                updates.push(msg);
            }
        }
        updates
    }

    #[test]
    fn messages_use_the_kebab_case_wire_format() {
        let json = serde_json::to_string(&BroadcastMessage::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);

        let json = serde_json::to_string(&BroadcastMessage::SubtitleUpdate {
            lines: Vec::new(),
            partial_text: "half".to_string(),
            connection_status: ConnectionStatus::Connected,
            error_message: String::new(),
            last_activity_timestamp: 99,
        })
        .unwrap();
        assert!(json.contains("\"type\":\"subtitle-update\""));
        assert!(json.contains("\"partialText\":\"half\""));
        assert!(json.contains("\"connectionStatus\":\"connected\""));
        assert!(json.contains("\"lastActivityTimestamp\":99"));

        let json = serde_json::to_string(&BroadcastMessage::StyleUpdate {
            style: SubtitleStyle::default(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"style-update\""));
        assert!(json.contains("\"fontFamily\""));
    }

    #[tokio::test(start_paused = true)]
    async fn start_sends_initial_snapshots_and_is_idempotent() {
        let (producer, _store, _style, mut rx) = build_producer();
        producer.start();
        producer.start();
        settle().await;

        assert!(matches!(rx.try_recv().unwrap(), BroadcastMessage::SubtitleUpdate { .. }));
        assert!(matches!(rx.try_recv().unwrap(), BroadcastMessage::StyleUpdate { .. }));
        assert!(rx.try_recv().is_err());
        assert!(producer.is_running());
        producer.stop();
        assert!(!producer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn line_changes_are_sent_immediately() {
        let (producer, store, _style, mut rx) = build_producer();
        producer.start();
        settle().await;
        drain_subtitle_updates(&mut rx);

        store.add_final_line("first");
        settle().await;
        store.add_final_line("second");
        settle().await;

        let updates = drain_subtitle_updates(&mut rx);
        assert_eq!(updates.len(), 2);
        match &updates[1] {
            BroadcastMessage::SubtitleUpdate { lines, .. } => {
                assert_eq!(lines.len(), 2);
                assert_eq!(lines[1].text, "second");
            }
            _ => panic!("Wrong message type"),
        }
        producer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn partial_updates_are_throttled_with_a_trailing_flush() {
        let (producer, store, _style, mut rx) = build_producer();
        producer.start();
        settle().await;
        drain_subtitle_updates(&mut rx);

        // A burst of hypotheses within one window
        for i in 0..10 {
            store.set_partial(&format!("hypothesis {}", i));
            settle().await;
        }
        // Leading edge only so far
        assert_eq!(drain_subtitle_updates(&mut rx).len(), 1);

        tokio::time::advance(Duration::from_millis(THROTTLE_MS)).await;
        settle().await;

        // Trailing flush carries the latest text
        let updates = drain_subtitle_updates(&mut rx);
        assert_eq!(updates.len(), 1);
        match &updates[0] {
            BroadcastMessage::SubtitleUpdate { partial_text, .. } => {
                assert_eq!(partial_text, "hypothesis 9");
            }
            _ => panic!("Wrong message type"),
        }
        producer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_partials_stay_within_the_rate_limit() {
        let (producer, store, _style, mut rx) = build_producer();
        producer.start();
        settle().await;
        drain_subtitle_updates(&mut rx);

        // One second of hypotheses every 20ms
        for i in 0..50 {
            store.set_partial(&format!("word {}", i));
            settle().await;
            tokio::time::advance(Duration::from_millis(20)).await;
            settle().await;
        }
        let sent = drain_subtitle_updates(&mut rx).len();
        assert!(sent <= 6, "sent {} subtitle updates in one second", sent);
        assert!(sent >= 5);
        producer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn important_change_cancels_the_pending_throttled_update() {
        let (producer, store, _style, mut rx) = build_producer();
        producer.start();
        settle().await;
        drain_subtitle_updates(&mut rx);

        store.set_partial("hyp one");
        settle().await;
        store.set_partial("hyp two");
        settle().await;
        // Finalization supersedes the queued partial
        store.add_final_line("hyp two done");
        settle().await;
        assert_eq!(drain_subtitle_updates(&mut rx).len(), 2);

        // Nothing left to flush when the window would have closed
        tokio::time::advance(Duration::from_millis(THROTTLE_MS)).await;
        settle().await;
        assert!(drain_subtitle_updates(&mut rx).is_empty());
        producer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn style_changes_are_sent_without_throttling() {
        let (producer, _store, style, mut rx) = build_producer();
        producer.start();
        settle().await;
        while rx.try_recv().is_ok() {}

        style.set(SubtitleStyle {
            font_size: 64,
            ..SubtitleStyle::default()
        });
        settle().await;
        match rx.try_recv().unwrap() {
            BroadcastMessage::StyleUpdate { style } => assert_eq!(style.font_size, 64),
            other => panic!("Expected style update, got {:?}", other),
        }
        producer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn pings_are_sent_on_the_heartbeat_interval() {
        let (producer, _store, _style, mut rx) = build_producer();
        producer.start();
        settle().await;
        while rx.try_recv().is_ok() {}

        tokio::time::advance(Duration::from_millis(PING_INTERVAL_MS)).await;
        settle().await;
        assert!(matches!(rx.try_recv().unwrap(), BroadcastMessage::Ping));

        tokio::time::advance(Duration::from_millis(PING_INTERVAL_MS)).await;
        settle().await;
        assert!(matches!(rx.try_recv().unwrap(), BroadcastMessage::Ping));
        producer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_the_channel() {
        let (producer, store, _style, mut rx) = build_producer();
        producer.start();
        settle().await;
        producer.stop();
        settle().await;
        while rx.try_recv().is_ok() {}

        store.add_final_line("after stop");
        tokio::time::advance(Duration::from_millis(PING_INTERVAL_MS)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
    }
}
