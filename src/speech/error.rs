//! Error types for the speech module

use crate::audio::AudioError;

/// WebSocket connection timeout in seconds
pub(super) const WS_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Errors surfaced when a recognizer fails to start.
///
/// Failures after startup never cross the provider boundary as errors; they
/// arrive as cancellation events so the reconnection logic can classify them.
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Connection timeout - service did not respond within {WS_CONNECT_TIMEOUT_SECS} seconds")]
    ConnectionTimeout,

    #[error("Invalid service endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Audio capture failed: {0}")]
    Audio(#[from] AudioError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_the_connect_window() {
        assert_eq!(
            RecognitionError::ConnectionTimeout.to_string(),
            "Connection timeout - service did not respond within 30 seconds"
        );
    }
}
