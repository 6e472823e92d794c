//! Caption state store
//!
//! Single source of truth for the caption view within one context: the rolling
//! line buffer, the in-progress partial text, connection status, audio level
//! and session timing. The broadcast producer observes mutations through a
//! change channel; receiver contexts apply replicated snapshots wholesale.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

/// Maximum number of caption lines kept in the live buffer.
///
/// Older lines are evicted FIFO; durable history lives in the transcript log.
pub const MAX_LINES: usize = 100;

/// Current epoch timestamp in milliseconds.
pub(crate) fn epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A single finalized caption line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionLine {
    /// Monotonic identifier within the producing store ("line-1", "line-2", ...)
    pub id: String,
    pub text: String,
    #[serde(rename = "isFinal")]
    pub is_final: bool,
    /// Epoch milliseconds at finalization time
    pub timestamp: i64,
}

/// Connection status of the recognition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionStatus {
    /// Whether a session is in an active-ish state (used by device-loss checks).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting | ConnectionStatus::Connected | ConnectionStatus::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Full observable caption state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptionState {
    pub lines: Vec<CaptionLine>,
    pub partial_text: String,
    pub connection_status: ConnectionStatus,
    pub error_message: String,
    pub audio_level: f32,
    pub last_activity_timestamp: i64,
    /// Epoch milliseconds of session start; 0 when no session is running
    pub session_start_time: i64,
}

/// Replicated subset of [`CaptionState`] carried in subtitle-update messages.
#[derive(Debug, Clone)]
pub struct ReplicaState {
    pub lines: Vec<CaptionLine>,
    pub partial_text: String,
    pub connection_status: ConnectionStatus,
    pub error_message: String,
    pub last_activity_timestamp: i64,
}

/// What kind of mutation just happened, for change observers.
///
/// `Lines` and `Status` are the "important" changes the broadcast producer
/// sends without throttling; everything else may be coalesced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    /// The ordered line sequence changed (append, eviction, correction, clear)
    Lines,
    /// The connection status value changed
    Status,
    /// Only the partial text changed
    Partial,
    /// Audio level or session timing changed
    Meta,
}

struct StoreInner {
    state: CaptionState,
    line_counter: u64,
}

/// Observable caption state store.
///
/// An explicit instance owned by the session context, never a global, so that
/// independent sessions and tests do not leak state into one another.
pub struct CaptionStore {
    inner: Mutex<StoreInner>,
    change_tx: broadcast::Sender<StoreChange>,
}

impl Default for CaptionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptionStore {
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(StoreInner {
                state: CaptionState::default(),
                line_counter: 0,
            }),
            change_tx,
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.change_tx.subscribe()
    }

    /// Snapshot of the current state.
    pub fn snapshot(&self) -> CaptionState {
        self.lock().state.clone()
    }

    /// Append a finalized caption line.
    ///
    /// Whitespace-only input is discarded here, at the boundary. Text is
    /// trimmed, the partial text is cleared and the buffer trimmed to
    /// [`MAX_LINES`] by dropping the oldest lines.
    pub fn add_final_line(&self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        let now = epoch_ms();
        {
            let mut inner = self.lock();
            inner.line_counter += 1;
            let id = format!("line-{}", inner.line_counter);
            inner.state.lines.push(CaptionLine {
                id,
                text: trimmed.to_string(),
                is_final: true,
                timestamp: now,
            });
            let len = inner.state.lines.len();
            if len > MAX_LINES {
                inner.state.lines.drain(..len - MAX_LINES);
            }
            inner.state.partial_text.clear();
            inner.state.last_activity_timestamp = now;
        }
        self.notify(StoreChange::Lines);
    }

    /// Replace the text of an existing line by id (targeted correction).
    pub fn update_line(&self, id: &str, text: &str) {
        let changed = {
            let mut inner = self.lock();
            match inner.state.lines.iter_mut().find(|l| l.id == id) {
                Some(line) => {
                    line.text = text.to_string();
                    true
                }
                None => false,
            }
        };
        if changed {
            self.notify(StoreChange::Lines);
        }
    }

    /// Set the in-progress recognition hypothesis.
    pub fn set_partial(&self, text: &str) {
        {
            let mut inner = self.lock();
            inner.state.partial_text = text.to_string();
            inner.state.last_activity_timestamp = epoch_ms();
        }
        self.notify(StoreChange::Partial);
    }

    /// Set the connection status, clearing or replacing the error message.
    pub fn set_status(&self, status: ConnectionStatus, error_message: &str) {
        let status_changed = {
            let mut inner = self.lock();
            let changed = inner.state.connection_status != status;
            inner.state.connection_status = status;
            inner.state.error_message = error_message.to_string();
            changed
        };
        if status_changed {
            self.notify(StoreChange::Status);
        } else {
            self.notify(StoreChange::Meta);
        }
    }

    pub fn set_audio_level(&self, level: f32) {
        {
            let mut inner = self.lock();
            inner.state.audio_level = level.clamp(0.0, 1.0);
        }
        self.notify(StoreChange::Meta);
    }

    pub fn set_session_start(&self, epoch_ms: i64) {
        {
            let mut inner = self.lock();
            inner.state.session_start_time = epoch_ms;
        }
        self.notify(StoreChange::Meta);
    }

    /// Drop all lines and partial text, keeping status and session timing.
    pub fn clear(&self) {
        {
            let mut inner = self.lock();
            inner.state.lines.clear();
            inner.state.partial_text.clear();
        }
        self.notify(StoreChange::Lines);
    }

    /// Reset to defaults, including the line id counter.
    pub fn reset(&self) {
        {
            let mut inner = self.lock();
            inner.state = CaptionState::default();
            inner.line_counter = 0;
        }
        self.notify(StoreChange::Lines);
        self.notify(StoreChange::Status);
    }

    /// Apply a replicated snapshot from the producing context.
    ///
    /// Used by receiver contexts only. Lines keep their producer-minted ids;
    /// the local id counter is untouched.
    pub fn apply_replica(&self, replica: ReplicaState) {
        {
            let mut inner = self.lock();
            inner.state.lines = replica.lines;
            inner.state.partial_text = replica.partial_text;
            inner.state.connection_status = replica.connection_status;
            inner.state.error_message = replica.error_message;
            inner.state.last_activity_timestamp = replica.last_activity_timestamp;
        }
        self.notify(StoreChange::Lines);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Caption store mutex was poisoned, recovering data");
                poisoned.into_inner()
            }
        }
    }

    fn notify(&self, change: StoreChange) {
        // No receivers is fine; observers come and go.
        let _ = self.change_tx.send(change);
    }
}
