//! Caption session orchestration
//!
//! Ties the whole engine together for one session: transcript capture, the
//! reconnection controller, the audio level monitor and its sampler, device
//! loss detection, the keep-awake hold and the recognition adapter. Teardown
//! runs in a fixed order so a stopping session can never schedule a retry.

use crate::audio::{AudioBackend, AudioLevelMonitor, DeviceEvent, DeviceWatch};
use crate::reconnect::ReconnectController;
use crate::speech::{RecognitionAdapter, SharedSettings};
use crate::store::{CaptionStore, ConnectionStatus};
use crate::transcript::TranscriptLog;
use crate::wakelock::KeepAwake;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Audio level sampling period.
const LEVEL_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Quiet period after a topology change before the device check runs.
/// Plugging a dock in or out fires several events back to back.
const DEVICE_CHANGE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Shown when the session's input device disappears.
const DEVICE_LOST_MESSAGE: &str = "Audio device disconnected. Please reconnect and restart.";

struct ActiveSession {
    monitor: Option<Arc<dyn AudioLevelMonitor>>,
    sampler: Option<JoinHandle<()>>,
    watcher: JoinHandle<()>,
    _device_watch: DeviceWatch,
}

/// Starts and stops caption sessions, owning their runtime resources.
pub struct SessionOrchestrator {
    settings: SharedSettings,
    store: Arc<CaptionStore>,
    transcript: Arc<TranscriptLog>,
    adapter: Arc<RecognitionAdapter>,
    reconnect: Arc<ReconnectController>,
    audio: Arc<dyn AudioBackend>,
    keep_awake: Arc<dyn KeepAwake>,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    retry_pump: JoinHandle<()>,
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        self.retry_pump.abort();
    }
}

impl SessionOrchestrator {
    /// Build the orchestrator and start pumping fired retries into the
    /// adapter. `retry_rx` is the channel returned by
    /// [`ReconnectController::new`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: SharedSettings,
        store: Arc<CaptionStore>,
        transcript: Arc<TranscriptLog>,
        adapter: Arc<RecognitionAdapter>,
        reconnect: Arc<ReconnectController>,
        audio: Arc<dyn AudioBackend>,
        keep_awake: Arc<dyn KeepAwake>,
        mut retry_rx: mpsc::UnboundedReceiver<()>,
    ) -> Arc<Self> {
        let pump_adapter = adapter.clone();
        let retry_pump = tokio::spawn(async move {
            while retry_rx.recv().await.is_some() {
                debug!("Reconnection retry fired, restarting recognition");
                pump_adapter.start().await;
            }
        });
        Arc::new(Self {
            settings,
            store,
            transcript,
            adapter,
            reconnect,
            audio,
            keep_awake,
            active: tokio::sync::Mutex::new(None),
            retry_pump,
        })
    }

    /// Start a caption session on the given device (configured device, then
    /// system default, when `None`).
    pub async fn start_session(self: &Arc<Self>, device_id: Option<&str>) {
        if self.active.lock().await.is_some() {
            self.stop_session().await;
        }

        let configured = self.settings_device();
        let resolved = device_id
            .map(str::to_string)
            .or(configured)
            .filter(|id| !id.is_empty());

        self.transcript.start_session();
        self.store.set_session_start(crate::store::epoch_ms());
        self.reconnect.enable();

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // The level monitor is best-effort; a session without a meter is
        // still a session.
        let monitor = match self.audio.start_monitor(resolved.as_deref(), event_tx.clone()) {
            Ok(monitor) => Some(monitor),
            Err(e) => {
                warn!("Audio level monitor unavailable: {}", e);
                None
            }
        };

        let sampler = monitor.as_ref().map(|monitor| {
            let monitor = monitor.clone();
            let store = self.store.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(LEVEL_SAMPLE_INTERVAL);
                loop {
                    tick.tick().await;
                    store.set_audio_level(monitor.level());
                }
            })
        });

        let device_watch = self.audio.watch_devices(event_tx);
        let watcher = tokio::spawn(watch_device_events(Arc::downgrade(self), event_rx));

        self.keep_awake.acquire();
        self.adapter.start().await;

        *self.active.lock().await = Some(ActiveSession {
            monitor,
            sampler,
            watcher,
            _device_watch: device_watch,
        });
        info!("Caption session started");
    }

    /// Stop the session: disarm reconnection before anything else so a
    /// failure observed mid-teardown cannot schedule a retry.
    pub async fn stop_session(&self) {
        self.reconnect.disable();
        self.keep_awake.release();
        self.adapter.stop().await;
        self.store.set_session_start(0);

        if let Some(active) = self.active.lock().await.take() {
            active.watcher.abort();
            if let Some(sampler) = active.sampler {
                sampler.abort();
            }
            if let Some(monitor) = active.monitor {
                monitor.stop();
            }
            info!("Caption session stopped");
        }
        self.store.set_audio_level(0.0);
    }

    pub async fn is_running(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Resume the session's level monitor if the platform suspended its
    /// stream. Hosts call this from a user gesture; a no-op without a
    /// running session or meter.
    pub async fn resume_audio_monitor(&self) {
        if let Some(active) = self.active.lock().await.as_ref() {
            if let Some(monitor) = &active.monitor {
                monitor.resume();
            }
        }
    }

    /// Number of transcript entries captured this session.
    pub fn transcript_entry_count(&self) -> usize {
        self.transcript.entry_count()
    }

    fn settings_device(&self) -> Option<String> {
        let settings = match self.settings.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        (!settings.audio_device_id.is_empty()).then_some(settings.audio_device_id.clone())
    }

    /// Whether the configured device vanished while the session is running.
    fn configured_device_missing(&self) -> bool {
        if !self.store.snapshot().connection_status.is_active() {
            return false;
        }
        let Some(device_id) = self.settings_device() else {
            return false;
        };
        match self.audio.input_devices() {
            Ok(devices) => !devices.iter().any(|d| d.device_id == device_id),
            Err(e) => {
                warn!("Device enumeration failed during topology check: {}", e);
                false
            }
        }
    }

    fn fail_device_lost(self: &Arc<Self>) {
        warn!("Audio input device lost, ending session");
        self.store.set_status(ConnectionStatus::Error, DEVICE_LOST_MESSAGE);
        // Teardown joins the watcher task, so it cannot run inline here.
        let this = self.clone();
        tokio::spawn(async move {
            this.stop_session().await;
            // Teardown publishes "disconnected"; device loss stays the
            // visible terminal state.
            this.store.set_status(ConnectionStatus::Error, DEVICE_LOST_MESSAGE);
        });
    }
}

async fn watch_device_events(
    orchestrator: Weak<SessionOrchestrator>,
    mut events: mpsc::UnboundedReceiver<DeviceEvent>,
) {
    loop {
        let event = match events.recv().await {
            Some(event) => event,
            None => break,
        };
        let Some(orchestrator) = orchestrator.upgrade() else {
            break;
        };
        match event {
            DeviceEvent::StreamLost => {
                orchestrator.fail_device_lost();
                break;
            }
            DeviceEvent::TopologyChanged => {
                tokio::time::sleep(DEVICE_CHANGE_DEBOUNCE).await;
                // Coalesce the burst; a stream loss during the quiet period wins.
                let mut stream_lost = false;
                while let Ok(event) = events.try_recv() {
                    if matches!(event, DeviceEvent::StreamLost) {
                        stream_lost = true;
                        break;
                    }
                }
                if stream_lost || orchestrator.configured_device_missing() {
                    orchestrator.fail_device_lost();
                    break;
                }
            }
        }
    }
}
