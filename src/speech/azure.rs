//! Azure Speech WebSocket provider
//!
//! Streams microphone audio to the Azure Speech service and turns its JSON
//! messages into provider events. Reconnection is NOT handled here: a lost
//! connection surfaces as a cancellation or session-stopped event and the
//! reconnection controller decides what happens next.

use super::error::{RecognitionError, WS_CONNECT_TIMEOUT_SECS};
use super::messages::{ClientMessage, ServerMessage, SessionConfig};
use super::{
    ActiveRecognizer, CancellationCode, ProviderEvent, RecognitionResult, RecognizerConfig,
    SpeechProvider, StopHandle,
};
use crate::audio::{self, AudioCaptureHandle, AudioChunk, TARGET_SAMPLE_RATE};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, error, info, trace, warn};

/// Speech service endpoint path for plain transcription.
const RECOGNITION_PATH: &str = "/speech/recognition/conversation/cognitiveservices/v1";
/// Speech service endpoint path for speech translation.
const TRANSLATION_PATH: &str = "/speech/translation/cognitiveservices/v1";

/// [`SpeechProvider`] backed by the Azure Speech WebSocket API.
pub struct AzureSpeechProvider;

impl AzureSpeechProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AzureSpeechProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechProvider for AzureSpeechProvider {
    fn start(&self, config: RecognizerConfig) -> Result<ActiveRecognizer, RecognitionError> {
        let ws_url = build_ws_url(&config);
        let parsed = url::Url::parse(&ws_url)
            .map_err(|e| RecognitionError::InvalidEndpoint(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| RecognitionError::InvalidEndpoint("no host in URL".to_string()))?
            .to_string();
        let request = build_ws_request(&ws_url, &host, &config.key)?;

        info!(
            region = %config.region,
            source_language = %config.source_language,
            target_language = ?config.target_language,
            "Connecting to Azure Speech"
        );

        // Microphone feed first; without audio there is nothing to recognize
        let (capture, audio_rx) =
            audio::start_capture(config.device_id.as_deref(), TARGET_SAMPLE_RATE)?;

        let (event_tx, events) = mpsc::unbounded_channel();
        let stop = StopHandle::new();
        tokio::spawn(run_connection(
            request,
            config,
            capture,
            audio_rx,
            event_tx,
            stop.clone(),
        ));

        Ok(ActiveRecognizer { events, stop })
    }
}

/// Build the service URL for the configured recognition mode.
fn build_ws_url(config: &RecognizerConfig) -> String {
    match &config.target_language {
        Some(target) => format!(
            "wss://{}.s2s.speech.microsoft.com{}?from={}&to={}&format=detailed",
            config.region, TRANSLATION_PATH, config.source_language, target
        ),
        None => format!(
            "wss://{}.stt.speech.microsoft.com{}?language={}&format=detailed",
            config.region, RECOGNITION_PATH, config.source_language
        ),
    }
}

/// Build the WebSocket upgrade request with subscription-key authentication.
fn build_ws_request(
    ws_url: &str,
    host: &str,
    api_key: &str,
) -> Result<http::Request<()>, RecognitionError> {
    http::Request::builder()
        .uri(ws_url)
        .header("Host", host)
        .header("Ocp-Apim-Subscription-Key", api_key)
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Key", generate_ws_key())
        .header("Sec-WebSocket-Version", "13")
        .body(())
        .map_err(|e| RecognitionError::ConnectionError(e.to_string()))
}

/// Generate a random WebSocket key
fn generate_ws_key() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut key = [0u8; 16];
    rng.fill(&mut key);
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// Map a failed WebSocket upgrade onto the cancellation taxonomy.
fn classify_connect_error(err: &tungstenite::Error) -> (CancellationCode, String) {
    if let tungstenite::Error::Http(response) = err {
        let code = match response.status().as_u16() {
            401 => CancellationCode::AuthenticationFailure,
            403 => CancellationCode::Forbidden,
            400 => CancellationCode::BadRequest,
            503 => CancellationCode::ServiceUnavailable,
            _ => CancellationCode::ConnectionFailure,
        };
        return (code, format!("service returned HTTP {}", response.status()));
    }
    (CancellationCode::ConnectionFailure, err.to_string())
}

/// Drive one recognizer connection until stopped or the stream ends.
async fn run_connection(
    request: http::Request<()>,
    config: RecognizerConfig,
    mut capture: AudioCaptureHandle,
    mut audio_rx: mpsc::Receiver<AudioChunk>,
    event_tx: mpsc::UnboundedSender<ProviderEvent>,
    stop: StopHandle,
) {
    let connect = timeout(
        Duration::from_secs(WS_CONNECT_TIMEOUT_SECS),
        connect_async(request),
    )
    .await;

    let ws_stream = match connect {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            error!("Azure Speech connection failed: {}", e);
            let (code, details) = classify_connect_error(&e);
            let _ = event_tx.send(ProviderEvent::Canceled { code, details });
            capture.stop();
            return;
        }
        Err(_) => {
            error!("Azure Speech connection timed out");
            let _ = event_tx.send(ProviderEvent::Canceled {
                code: CancellationCode::ConnectionFailure,
                details: RecognitionError::ConnectionTimeout.to_string(),
            });
            capture.stop();
            return;
        }
    };

    info!("Connected to Azure Speech");
    let (mut ws_sink, mut ws_source) = ws_stream.split();

    let session_config = SessionConfig::new(
        &config.source_language,
        config.target_language.as_deref(),
        &config.phrases,
    );
    if let Err(e) = send_json(&mut ws_sink, &ClientMessage::SessionUpdate { session: session_config }).await {
        error!("Failed to send session config: {}", e);
        let _ = event_tx.send(ProviderEvent::Canceled {
            code: CancellationCode::ConnectionFailure,
            details: e,
        });
        capture.stop();
        return;
    }

    // The stream is live once the service has our configuration
    let _ = event_tx.send(ProviderEvent::SessionStarted);

    let base64_engine = base64::engine::general_purpose::STANDARD;
    let mut chunks_sent = 0u64;

    loop {
        tokio::select! {
            biased;

            _ = stop.wait() => {
                debug!("Recognizer stop requested, closing connection");
                let _ = ws_sink.close().await;
                break;
            }

            msg = ws_source.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        trace!("Azure Speech message: {}", text);
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(server_msg) => {
                                if !handle_server_message(server_msg, &event_tx) {
                                    break;
                                }
                            }
                            Err(e) => warn!("Failed to parse service message: {} - {}", e, text),
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(_))) | None => {
                        if !stop.is_signaled() {
                            info!("Azure Speech stream ended by server");
                            let _ = event_tx.send(ProviderEvent::SessionStopped);
                        }
                        break;
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) | Some(Ok(tungstenite::Message::Pong(_))) => {
                        trace!("WebSocket keepalive");
                    }
                    Some(Err(e)) => {
                        if !stop.is_signaled() {
                            error!("Azure Speech receive error: {}", e);
                            let _ = event_tx.send(ProviderEvent::Canceled {
                                code: CancellationCode::ConnectionFailure,
                                details: e.to_string(),
                            });
                        }
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }

            chunk = audio_rx.recv() => {
                match chunk {
                    Some(chunk) => {
                        chunks_sent += 1;
                        if chunks_sent == 1 || chunks_sent % 100 == 0 {
                            debug!("Sending audio chunk #{} ({} samples)", chunks_sent, chunk.samples.len());
                        }
                        let bytes: Vec<u8> = chunk.samples.iter().flat_map(|&s| s.to_le_bytes()).collect();
                        let audio = base64_engine.encode(&bytes);
                        if let Err(e) = send_json(&mut ws_sink, &ClientMessage::AudioAppend { audio }).await {
                            if !stop.is_signaled() {
                                error!("Failed to send audio chunk: {}", e);
                                let _ = event_tx.send(ProviderEvent::Canceled {
                                    code: CancellationCode::ConnectionFailure,
                                    details: e,
                                });
                            }
                            break;
                        }
                    }
                    None => {
                        info!("Audio feed ended after {} chunks", chunks_sent);
                        let _ = ws_sink.close().await;
                        break;
                    }
                }
            }
        }
    }

    capture.stop();
}

/// Route one parsed service message; returns false when the connection is done.
fn handle_server_message(
    msg: ServerMessage,
    event_tx: &mpsc::UnboundedSender<ProviderEvent>,
) -> bool {
    match msg {
        ServerMessage::SpeechHypothesis { text, translations } => {
            let _ = event_tx.send(ProviderEvent::Partial(RecognitionResult {
                text: text.unwrap_or_default(),
                translations: translations.unwrap_or_default(),
            }));
            true
        }
        ref phrase @ ServerMessage::SpeechPhrase { .. } if !phrase.is_recognized() => {
            debug!("Discarding no-match phrase");
            true
        }
        ServerMessage::SpeechPhrase { text, translations, .. } => {
            let _ = event_tx.send(ProviderEvent::Final(RecognitionResult {
                text: text.unwrap_or_default(),
                translations: translations.unwrap_or_default(),
            }));
            true
        }
        ServerMessage::Error { error } => {
            let (code, details) = match error {
                Some(body) => (body.cancellation_code(), body.details()),
                None => (CancellationCode::Other, String::new()),
            };
            error!("Azure Speech error: {:?} {}", code, details);
            let _ = event_tx.send(ProviderEvent::Canceled { code, details });
            false
        }
        ServerMessage::TurnStart => {
            debug!("Recognition turn started");
            true
        }
        ServerMessage::TurnEnd => {
            debug!("Recognition turn ended");
            true
        }
        ServerMessage::Other => true,
    }
}

async fn send_json<S>(ws_sink: &mut S, msg: &ClientMessage) -> Result<(), String>
where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    ws_sink
        .send(tungstenite::Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(target: Option<&str>) -> RecognizerConfig {
        RecognizerConfig {
            key: "k".to_string(),
            region: "westeurope".to_string(),
            source_language: "en-US".to_string(),
            target_language: target.map(String::from),
            device_id: None,
            phrases: Vec::new(),
        }
    }

    #[test]
    fn plain_recognition_url_targets_the_stt_host() {
        let url = build_ws_url(&config(None));
        assert!(url.starts_with("wss://westeurope.stt.speech.microsoft.com/"));
        assert!(url.contains("language=en-US"));
        assert!(!url.contains("to="));
    }

    #[test]
    fn translation_url_targets_the_s2s_host() {
        let url = build_ws_url(&config(Some("nl")));
        assert!(url.starts_with("wss://westeurope.s2s.speech.microsoft.com/"));
        assert!(url.contains("from=en-US"));
        assert!(url.contains("to=nl"));
    }

    #[test]
    fn upgrade_request_carries_the_subscription_key() {
        let url = build_ws_url(&config(None));
        let request = build_ws_request(&url, "westeurope.stt.speech.microsoft.com", "secret").unwrap();
        assert_eq!(
            request.headers().get("Ocp-Apim-Subscription-Key").unwrap(),
            "secret"
        );
        assert!(request.headers().contains_key("Sec-WebSocket-Key"));
    }

    #[test]
    fn ws_keys_are_random() {
        assert_ne!(generate_ws_key(), generate_ws_key());
    }

    #[tokio::test]
    async fn server_error_message_maps_to_cancellation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let msg: ServerMessage = serde_json::from_str(
            r#"{"type": "error", "error": {"code": "ServiceUnavailable", "message": "busy"}}"#,
        )
        .unwrap();
        assert!(!handle_server_message(msg, &tx));
        match rx.try_recv().unwrap() {
            ProviderEvent::Canceled { code, details } => {
                assert_eq!(code, CancellationCode::ServiceUnavailable);
                assert_eq!(details, "busy");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn no_match_phrases_are_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type": "speech.phrase", "text": "", "status": "NoMatch"}"#)
                .unwrap();
        assert!(handle_server_message(msg, &tx));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn hypothesis_becomes_a_partial_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let msg: ServerMessage = serde_json::from_str(
            r#"{"type": "speech.hypothesis", "text": "hallo", "translations": {"nl": "hallo"}}"#,
        )
        .unwrap();
        assert!(handle_server_message(msg, &tx));
        match rx.try_recv().unwrap() {
            ProviderEvent::Partial(result) => {
                assert_eq!(result.text, "hallo");
                assert_eq!(result.translations.get("nl").unwrap(), "hallo");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
