#![deny(clippy::all)]

use anyhow::Context;
use livesubs::audio::CpalBackend;
use livesubs::broadcast::{BroadcastProducer, InProcessBus, MessageBus};
use livesubs::reconnect::ReconnectController;
use livesubs::session::SessionOrchestrator;
use livesubs::settings::Settings;
use livesubs::speech::{AzureSpeechProvider, RecognitionAdapter};
use livesubs::storage::{save_transcript, ExportFormat};
use livesubs::store::CaptionStore;
use livesubs::style::StyleStore;
use livesubs::transcript::TranscriptLog;
use livesubs::wakelock::NoopKeepAwake;
use livesubs::DemoPlayback;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let _ = dotenvy::dotenv();

    let mode = std::env::args().nth(1).unwrap_or_else(|| "live".to_string());
    match mode.as_str() {
        "live" => run_live().await,
        "demo" => run_demo().await,
        other => anyhow::bail!("Unknown mode '{}' (expected 'live' or 'demo')", other),
    }
}

/// Run a real caption session until Ctrl-C, then save the transcript.
async fn run_live() -> anyhow::Result<()> {
    let settings = Settings::load(Path::new(CONFIG_PATH)).context("loading settings")?;
    if !settings.has_credentials() {
        anyhow::bail!(
            "Azure Speech key and region are required (config.toml or {}/{})",
            livesubs::settings::ENV_AZURE_KEY,
            livesubs::settings::ENV_AZURE_REGION
        );
    }
    let settings = Arc::new(RwLock::new(settings));

    let store = Arc::new(CaptionStore::new());
    let style = Arc::new(StyleStore::new());
    let transcript = Arc::new(TranscriptLog::new());
    let (reconnect, retry_rx) = ReconnectController::new(store.clone());
    let adapter = Arc::new(RecognitionAdapter::new(
        settings.clone(),
        store.clone(),
        transcript.clone(),
        reconnect.clone(),
        Arc::new(AzureSpeechProvider::new()),
    ));
    let orchestrator = SessionOrchestrator::new(
        settings,
        store.clone(),
        transcript.clone(),
        adapter,
        reconnect,
        Arc::new(CpalBackend::new()),
        Arc::new(NoopKeepAwake::new()),
        retry_rx,
    );

    let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
    let producer = BroadcastProducer::new(store.clone(), style, bus);
    producer.start();

    let console = tokio::spawn(print_captions(store.clone()));

    orchestrator.start_session(None).await;
    info!("Captioning - press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

    orchestrator.stop_session().await;
    producer.stop();
    console.abort();

    if transcript.entry_count() > 0 {
        for format in [ExportFormat::Text, ExportFormat::Srt] {
            match save_transcript(&transcript, format) {
                Ok(path) => info!("Transcript saved to {:?}", path),
                Err(e) => warn!("Could not save transcript: {}", e),
            }
        }
    }
    Ok(())
}

/// Run the canned-phrase demo until Ctrl-C. Needs no credentials.
async fn run_demo() -> anyhow::Result<()> {
    let store = Arc::new(CaptionStore::new());
    let style = Arc::new(StyleStore::new());
    let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
    let producer = BroadcastProducer::new(store.clone(), style, bus);
    producer.start();

    let console = tokio::spawn(print_captions(store.clone()));

    let demo = DemoPlayback::new(store);
    demo.start();
    info!("Demo playback - press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

    demo.stop();
    producer.stop();
    console.abort();
    Ok(())
}

/// Print finalized caption lines to stdout as they arrive.
async fn print_captions(store: Arc<CaptionStore>) {
    use livesubs::store::StoreChange;
    let mut changes = store.subscribe();
    let mut printed = 0usize;
    loop {
        match changes.recv().await {
            Ok(StoreChange::Lines) => {
                let state = store.snapshot();
                for line in state.lines.iter().skip(printed) {
                    println!("{}", line.text);
                }
                printed = state.lines.len();
            }
            Ok(StoreChange::Status) => {
                let state = store.snapshot();
                if state.error_message.is_empty() {
                    info!("Status: {}", state.connection_status);
                } else {
                    warn!("Status: {} ({})", state.connection_status, state.error_message);
                }
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                printed = store.snapshot().lines.len();
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}
