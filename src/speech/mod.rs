//! Recognition adapter and speech provider contract
//!
//! The adapter owns the lifecycle of exactly one active recognizer handle and
//! routes provider events into the caption store and transcript log. Transient
//! failures defer to the reconnection controller; permanent ones surface as a
//! terminal error status. Providers implement [`SpeechProvider`], so the whole
//! transition table is testable with a scripted in-process provider.

mod azure;
mod error;
mod messages;

pub use azure::AzureSpeechProvider;
pub use error::RecognitionError;

use crate::reconnect::ReconnectController;
use crate::settings::Settings;
use crate::store::{CaptionStore, ConnectionStatus};
use crate::transcript::TranscriptLog;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared, reloadable session settings.
pub type SharedSettings = Arc<RwLock<Settings>>;

/// Cancellation error classes reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationCode {
    ConnectionFailure,
    AuthenticationFailure,
    BadRequest,
    Forbidden,
    ServiceUnavailable,
    Other,
}

/// One recognition hypothesis or finalized utterance from the provider.
#[derive(Debug, Clone, Default)]
pub struct RecognitionResult {
    /// Recognized text in the source language
    pub text: String,
    /// Translations keyed by target language code, when translating
    pub translations: HashMap<String, String>,
}

/// Events delivered by an active recognizer.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// In-progress hypothesis for the current utterance
    Partial(RecognitionResult),
    /// Finalized utterance
    Final(RecognitionResult),
    /// The provider canceled the stream with an error reason
    Canceled {
        code: CancellationCode,
        details: String,
    },
    /// The provider confirmed the stream is live
    SessionStarted,
    /// The provider ended the stream without a local stop
    SessionStopped,
}

/// Everything a provider needs to start continuous recognition.
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    pub key: String,
    pub region: String,
    pub source_language: String,
    /// Set iff translation mode is active
    pub target_language: Option<String>,
    pub device_id: Option<String>,
    pub phrases: Vec<String>,
}

/// Graceful-stop signal shared between the adapter and provider tasks.
#[derive(Clone)]
pub struct StopHandle {
    signaled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self {
            signaled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Request a graceful stop. Idempotent.
    pub fn signal(&self) {
        self.signaled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::SeqCst)
    }

    /// Wait until a stop is requested.
    pub async fn wait(&self) {
        while !self.is_signaled() {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before the flag re-check so a concurrent signal
            // cannot slip between them.
            notified.as_mut().enable();
            if self.is_signaled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A started recognizer: its event stream and stop signal.
pub struct ActiveRecognizer {
    pub events: mpsc::UnboundedReceiver<ProviderEvent>,
    pub stop: StopHandle,
}

/// An external continuous-recognition service.
///
/// `start` returns quickly; connection failures after startup arrive as
/// [`ProviderEvent::Canceled`] so the reconnection machinery can classify them.
pub trait SpeechProvider: Send + Sync {
    fn start(&self, config: RecognizerConfig) -> Result<ActiveRecognizer, RecognitionError>;
}

/// Whether output requires translation: a target language is configured and
/// differs from the base of the source language. An auto-detected source
/// always translates (its "base" never equals a concrete target code).
pub(crate) fn needs_translation(settings: &Settings) -> bool {
    if settings.target_language.is_empty() {
        return false;
    }
    let source_base = settings
        .source_language
        .split('-')
        .next()
        .unwrap_or(&settings.source_language);
    source_base != settings.target_language
}

/// Human-readable message and transience flag for a cancellation class.
pub(crate) fn classify_cancellation(code: CancellationCode, details: &str) -> (String, bool) {
    match code {
        CancellationCode::ConnectionFailure => (
            "Connection failed. Check your internet connection and Azure region.".to_string(),
            true,
        ),
        CancellationCode::AuthenticationFailure => (
            "Authentication failed. Check your Azure Speech key.".to_string(),
            false,
        ),
        CancellationCode::BadRequest => {
            ("Bad request. Check your language settings.".to_string(), false)
        }
        CancellationCode::Forbidden => (
            "Access forbidden. Check your Azure subscription.".to_string(),
            false,
        ),
        CancellationCode::ServiceUnavailable => (
            "Azure Speech service is temporarily unavailable.".to_string(),
            true,
        ),
        CancellationCode::Other => {
            let message = if details.trim().is_empty() {
                "Unknown recognition error".to_string()
            } else {
                details.to_string()
            };
            (message, true)
        }
    }
}

/// Pick the caption text for a result: the translation for the configured
/// target when present, falling back to the source text.
fn select_text(result: &RecognitionResult, target_language: Option<&str>) -> String {
    if let Some(target) = target_language {
        if let Some(translated) = result.translations.get(target) {
            return translated.clone();
        }
    }
    result.text.clone()
}

struct Active {
    stop: StopHandle,
    pump: JoinHandle<()>,
}

/// Owns the single active recognizer handle and its event routing.
pub struct RecognitionAdapter {
    settings: SharedSettings,
    store: Arc<CaptionStore>,
    transcript: Arc<TranscriptLog>,
    reconnect: Arc<ReconnectController>,
    provider: Arc<dyn SpeechProvider>,
    active: tokio::sync::Mutex<Option<Active>>,
}

impl RecognitionAdapter {
    pub fn new(
        settings: SharedSettings,
        store: Arc<CaptionStore>,
        transcript: Arc<TranscriptLog>,
        reconnect: Arc<ReconnectController>,
        provider: Arc<dyn SpeechProvider>,
    ) -> Self {
        Self {
            settings,
            store,
            transcript,
            reconnect,
            provider,
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Start continuous recognition, stopping any active handle first.
    ///
    /// Failures never escape as errors: missing credentials and provider
    /// startup failures become a terminal error status in the store.
    pub async fn start(&self) {
        self.stop_active(false).await;

        let settings = self.settings_snapshot();
        if !settings.has_credentials() {
            self.store.set_status(
                ConnectionStatus::Error,
                "Azure Speech key and region are required.",
            );
            return;
        }

        self.store.set_status(ConnectionStatus::Connecting, "");

        let use_translation = needs_translation(&settings);
        let target_language = use_translation.then(|| settings.target_language.clone());
        let config = RecognizerConfig {
            key: settings.azure_key.clone(),
            region: settings.azure_region.clone(),
            source_language: settings.source_language.clone(),
            target_language: target_language.clone(),
            device_id: (!settings.audio_device_id.is_empty())
                .then(|| settings.audio_device_id.clone()),
            phrases: settings.phrases.clone(),
        };

        match self.provider.start(config) {
            Ok(recognizer) => {
                let stop = recognizer.stop.clone();
                let pump = tokio::spawn(pump_events(
                    recognizer.events,
                    stop.clone(),
                    self.store.clone(),
                    self.transcript.clone(),
                    self.reconnect.clone(),
                    target_language,
                ));
                *self.active.lock().await = Some(Active { stop, pump });
                info!(translation = use_translation, "Recognition started");
            }
            Err(e) => {
                warn!("Failed to start recognition: {}", e);
                self.store.set_status(ConnectionStatus::Error, &e.to_string());
            }
        }
    }

    /// Stop the active recognizer, if any, and publish `disconnected`.
    pub async fn stop(&self) {
        self.stop_active(true).await;
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    async fn stop_active(&self, publish_disconnected: bool) {
        let Some(active) = self.active.lock().await.take() else {
            return;
        };
        // Detach first, then request a graceful stop; resources are released
        // whether or not the provider shuts down cleanly.
        active.stop.signal();
        if tokio::time::timeout(Duration::from_secs(5), active.pump)
            .await
            .is_err()
        {
            warn!("Recognizer did not stop within 5s");
        }
        if publish_disconnected {
            self.store.set_status(ConnectionStatus::Disconnected, "");
        }
    }

    fn settings_snapshot(&self) -> Settings {
        match self.settings.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Route provider events until the stream ends or a stop is requested.
async fn pump_events(
    mut events: mpsc::UnboundedReceiver<ProviderEvent>,
    stop: StopHandle,
    store: Arc<CaptionStore>,
    transcript: Arc<TranscriptLog>,
    reconnect: Arc<ReconnectController>,
    target_language: Option<String>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.wait() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            ProviderEvent::Partial(result) => {
                store.set_partial(&select_text(&result, target_language.as_deref()));
            }
            ProviderEvent::Final(result) => {
                let text = select_text(&result, target_language.as_deref());
                store.add_final_line(&text);
                transcript.add_entry(&text);
            }
            ProviderEvent::SessionStarted => {
                reconnect.reset_backoff();
                store.set_status(ConnectionStatus::Connected, "");
            }
            ProviderEvent::SessionStopped => {
                if reconnect.is_enabled() {
                    reconnect.attempt();
                } else {
                    store.set_status(ConnectionStatus::Disconnected, "");
                }
            }
            ProviderEvent::Canceled { code, details } => {
                let (message, transient) = classify_cancellation(code, &details);
                if transient && reconnect.is_enabled() {
                    debug!("Transient recognizer failure ({:?}), scheduling retry", code);
                    reconnect.attempt();
                } else {
                    store.set_status(ConnectionStatus::Error, &message);
                }
            }
        }
    }
}
