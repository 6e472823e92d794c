//! Session transcript log
//!
//! Append-only record of finalized utterances, independent of the rolling
//! caption buffer. Reset at session start, never evicted, used only for the
//! time-relative export formats.

use crate::store::epoch_ms;
use std::sync::Mutex;
use tracing::warn;

/// Display duration assigned to each subtitle block in SRT export.
const SRT_DURATION_MS: i64 = 3000;

/// One finalized utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub text: String,
    /// Epoch milliseconds at finalization time
    pub timestamp: i64,
}

struct LogInner {
    entries: Vec<TranscriptEntry>,
    session_start: i64,
}

/// Append-only transcript log for one session.
pub struct TranscriptLog {
    inner: Mutex<LogInner>,
}

impl Default for TranscriptLog {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LogInner {
                entries: Vec::new(),
                session_start: 0,
            }),
        }
    }

    /// Drop all entries and stamp a new session start.
    pub fn start_session(&self) {
        self.start_session_at(epoch_ms());
    }

    /// Like [`start_session`](Self::start_session) with an explicit timestamp.
    pub fn start_session_at(&self, epoch_ms: i64) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.session_start = epoch_ms;
    }

    /// Append an entry. Whitespace-only text is discarded.
    pub fn add_entry(&self, text: &str) {
        self.add_entry_at(text, epoch_ms());
    }

    /// Like [`add_entry`](Self::add_entry) with an explicit timestamp.
    pub fn add_entry_at(&self, text: &str, epoch_ms: i64) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        self.lock().entries.push(TranscriptEntry {
            text: trimmed.to_string(),
            timestamp: epoch_ms,
        });
    }

    pub fn entry_count(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.lock().entries.clone()
    }

    /// Line-oriented export: `[HH:MM:SS] text`, offsets relative to session start.
    pub fn export_as_text(&self) -> String {
        let inner = self.lock();
        inner
            .entries
            .iter()
            .map(|e| format!("[{}] {}", format_offset(e.timestamp - inner.session_start), e.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// SubRip export: 1-based blocks with a fixed 3 second display duration.
    pub fn export_as_srt(&self) -> String {
        let inner = self.lock();
        inner
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let offset = e.timestamp - inner.session_start;
                format!(
                    "{}\n{} --> {}\n{}\n",
                    i + 1,
                    format_srt_offset(offset),
                    format_srt_offset(offset + SRT_DURATION_MS),
                    e.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Transcript log mutex was poisoned, recovering data");
                poisoned.into_inner()
            }
        }
    }
}

/// Format a millisecond offset as `HH:MM:SS`.
fn format_offset(ms: i64) -> String {
    let total_seconds = ms.max(0) / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Format a millisecond offset as `HH:MM:SS,mmm` (SubRip timestamp).
fn format_srt_offset(ms: i64) -> String {
    let clamped = ms.max(0);
    format!("{},{:03}", format_offset(clamped), clamped % 1000)
}
