//! Azure Speech streaming message types
//!
//! Defines the JSON message shapes exchanged over the recognition WebSocket.
//! The service contract beyond these shapes is opaque to the rest of the
//! crate; everything downstream consumes provider events.

use super::CancellationCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Messages sent to the recognition service
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub(crate) enum ClientMessage {
    /// Session configuration sent after connection
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    /// Append audio data to the input buffer
    #[serde(rename = "audio.append")]
    AudioAppend { audio: String },
}

/// Recognition session configuration
#[derive(Debug, Serialize)]
pub(crate) struct SessionConfig {
    /// Input audio format (pcm16)
    pub input_audio_format: String,
    /// Source language BCP-47 tag, or "auto"
    pub language: String,
    /// Translation targets; empty for plain transcription
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_languages: Vec<String>,
    /// Custom-vocabulary phrase list
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub phrases: Vec<String>,
}

impl SessionConfig {
    pub fn new(language: &str, target_language: Option<&str>, phrases: &[String]) -> Self {
        Self {
            input_audio_format: "pcm16".to_string(),
            language: language.to_string(),
            target_languages: target_language.map(|t| vec![t.to_string()]).unwrap_or_default(),
            phrases: phrases.to_vec(),
        }
    }
}

/// Messages received from the recognition service
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum ServerMessage {
    /// A recognition turn began
    #[serde(rename = "turn.start")]
    TurnStart,
    /// In-progress hypothesis for the current utterance
    #[serde(rename = "speech.hypothesis")]
    SpeechHypothesis {
        text: Option<String>,
        translations: Option<HashMap<String, String>>,
    },
    /// Finalized utterance
    #[serde(rename = "speech.phrase")]
    SpeechPhrase {
        text: Option<String>,
        translations: Option<HashMap<String, String>>,
        status: Option<String>,
    },
    /// The recognition turn ended
    #[serde(rename = "turn.end")]
    TurnEnd,
    /// Service-side error
    #[serde(rename = "error")]
    Error { error: Option<ErrorBody> },
    /// Catch-all for other message types
    #[serde(other)]
    Other,
}

/// Error payload from the service
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl ErrorBody {
    /// Map the service error code onto the cancellation taxonomy.
    pub fn cancellation_code(&self) -> CancellationCode {
        match self.code.as_deref() {
            Some("ConnectionFailure") => CancellationCode::ConnectionFailure,
            Some("AuthenticationFailure") => CancellationCode::AuthenticationFailure,
            Some("BadRequest") => CancellationCode::BadRequest,
            Some("Forbidden") => CancellationCode::Forbidden,
            Some("ServiceUnavailable") => CancellationCode::ServiceUnavailable,
            _ => CancellationCode::Other,
        }
    }

    pub fn details(&self) -> String {
        self.message.clone().unwrap_or_default()
    }
}

impl ServerMessage {
    /// Whether a `speech.phrase` represents recognized speech (vs. no-match).
    pub fn is_recognized(&self) -> bool {
        match self {
            ServerMessage::SpeechPhrase { status, .. } => {
                status.as_deref().map(|s| s == "Success").unwrap_or(true)
            }
            _ => false,
        }
    }
}
