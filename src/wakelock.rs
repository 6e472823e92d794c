//! Best-effort keep-awake hold
//!
//! Keeps the machine from idling to sleep while a caption session runs.
//! Strictly best-effort: platforms without support degrade silently and the
//! session continues without it.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// A keep-awake provider. Acquire/release are idempotent.
pub trait KeepAwake: Send + Sync {
    /// Try to take the hold; returns whether one is now held.
    fn acquire(&self) -> bool;
    /// Drop the hold, if held.
    fn release(&self);
}

/// Fallback provider for platforms without an idle-inhibit API.
pub struct NoopKeepAwake {
    held: AtomicBool,
}

impl NoopKeepAwake {
    pub fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }
}

impl Default for NoopKeepAwake {
    fn default() -> Self {
        Self::new()
    }
}

impl KeepAwake for NoopKeepAwake {
    fn acquire(&self) -> bool {
        debug!("Keep-awake not supported on this platform, continuing without it");
        self.held.store(true, Ordering::SeqCst);
        false
    }

    fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_provider_never_reports_a_hold() {
        let wake = NoopKeepAwake::new();
        assert!(!wake.acquire());
        wake.release();
        assert!(!wake.acquire());
    }
}
