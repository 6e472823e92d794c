//! Audio types and error definitions

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;

/// An enumerable audio input device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub device_id: String,
    pub label: String,
}

/// Events from the audio layer the session orchestrator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The set of input devices changed (something plugged/unplugged)
    TopologyChanged,
    /// The monitored input stream died (device yanked mid-session)
    StreamLost,
}

/// Audio chunk ready to be streamed to the recognition service.
///
/// PCM 16-bit signed mono samples, typically at 16kHz after resampling.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

/// Handle for controlling audio capture from outside the capture thread.
///
/// Capture stops when [`stop`](Self::stop) is called or the handle is dropped.
pub struct AudioCaptureHandle {
    pub(crate) is_capturing: Arc<AtomicBool>,
    pub(crate) thread_handle: Option<JoinHandle<()>>,
}

impl AudioCaptureHandle {
    /// Stop capturing audio and join the capture thread.
    pub fn stop(&mut self) {
        self.is_capturing.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        info!("Audio capture stopped");
    }

    pub fn is_capturing(&self) -> bool {
        self.is_capturing.load(Ordering::SeqCst)
    }
}

impl Drop for AudioCaptureHandle {
    fn drop(&mut self) {
        self.is_capturing.store(false, Ordering::SeqCst);
    }
}

/// Errors from the audio layer
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("Audio input device '{0}' not found")]
    UnknownDevice(String),

    #[error("No supported audio configuration found")]
    NoSupportedConfig,

    #[error("Audio configuration error: {0}")]
    ConfigError(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio device error: {0}")]
    DeviceError(#[from] cpal::DevicesError),

    #[error("Audio stream error: {0}")]
    StreamError(#[from] cpal::BuildStreamError),

    #[error("Audio play error: {0}")]
    PlayError(#[from] cpal::PlayStreamError),

    #[error("Default config error: {0}")]
    DefaultConfigError(#[from] cpal::DefaultStreamConfigError),
}
