//! Audio input: device enumeration, level metering and the recognizer feed
//!
//! Everything the session layer consumes is behind the [`AudioBackend`] trait
//! so orchestration is testable without a sound card. The cpal implementation
//! runs capture on dedicated threads (cpal streams are not `Send`), mixes to
//! mono and resamples to 16kHz for the recognition service.

mod resampler;
mod types;

pub use types::{AudioCaptureHandle, AudioChunk, AudioDevice, AudioError, DeviceEvent};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use resampler::ChunkPipeline;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Target sample rate for the recognition service feed (16kHz).
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Poll interval for device-topology changes.
const TOPOLOGY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Live audio-level meter bound to one input device.
pub trait AudioLevelMonitor: Send + Sync {
    /// Current level in `[0, 1]`.
    fn level(&self) -> f32;
    /// Stop metering and release the device.
    fn stop(&self);
    /// Resume a suspended stream, if the platform suspended it.
    fn resume(&self);
}

/// Audio input services consumed by the session orchestrator.
pub trait AudioBackend: Send + Sync {
    /// Enumerate input devices.
    fn input_devices(&self) -> Result<Vec<AudioDevice>, AudioError>;

    /// Start a level monitor on the given device (default device when `None`).
    ///
    /// Stream-loss events (device yanked) are delivered on `events`.
    fn start_monitor(
        &self,
        device_id: Option<&str>,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Result<Arc<dyn AudioLevelMonitor>, AudioError>;

    /// Watch for device-topology changes, delivered on `events`.
    /// Watching stops when the returned guard is dropped.
    fn watch_devices(&self, events: mpsc::UnboundedSender<DeviceEvent>) -> DeviceWatch;
}

/// Guard for an active device-topology watch.
pub struct DeviceWatch {
    stop: Arc<AtomicBool>,
}

impl Drop for DeviceWatch {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// cpal-backed implementation of [`AudioBackend`].
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn input_devices(&self) -> Result<Vec<AudioDevice>, AudioError> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;
        Ok(devices
            .filter_map(|d| d.name().ok())
            .map(|name| AudioDevice {
                device_id: name.clone(),
                label: name,
            })
            .collect())
    }

    fn start_monitor(
        &self,
        device_id: Option<&str>,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Result<Arc<dyn AudioLevelMonitor>, AudioError> {
        let monitor = CpalLevelMonitor::start(device_id, events)?;
        Ok(Arc::new(monitor))
    }

    fn watch_devices(&self, events: mpsc::UnboundedSender<DeviceEvent>) -> DeviceWatch {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        thread::spawn(move || {
            let mut known = enumerate_device_names();
            while !stop_thread.load(Ordering::SeqCst) {
                thread::sleep(TOPOLOGY_POLL_INTERVAL);
                if stop_thread.load(Ordering::SeqCst) || events.is_closed() {
                    break;
                }
                let current = enumerate_device_names();
                if current != known {
                    known = current;
                    if events.send(DeviceEvent::TopologyChanged).is_err() {
                        break;
                    }
                }
            }
        });
        DeviceWatch { stop }
    }
}

fn enumerate_device_names() -> Vec<String> {
    let host = cpal::default_host();
    let mut names: Vec<String> = match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            warn!("Device enumeration failed: {}", e);
            Vec::new()
        }
    };
    names.sort();
    names
}

/// Resolve a device by id (cpal device name), or the default input device.
fn find_input_device(device_id: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match device_id {
        Some(id) if !id.is_empty() => host
            .input_devices()?
            .find(|d| d.name().map(|n| n == id).unwrap_or(false))
            .ok_or_else(|| AudioError::UnknownDevice(id.to_string())),
        _ => host
            .default_input_device()
            .ok_or(AudioError::NoInputDevice),
    }
}

/// RMS level meter running its own capture thread.
struct CpalLevelMonitor {
    level_bits: Arc<AtomicU32>,
    stopped: Arc<AtomicBool>,
    resume_requested: Arc<AtomicBool>,
}

impl CpalLevelMonitor {
    fn start(
        device_id: Option<&str>,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Result<Self, AudioError> {
        let device = find_input_device(device_id)?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Starting audio level monitor on: {}", device_name);

        let level_bits = Arc::new(AtomicU32::new(0));
        let stopped = Arc::new(AtomicBool::new(false));
        let resume_requested = Arc::new(AtomicBool::new(false));

        let level_thread = level_bits.clone();
        let stopped_thread = stopped.clone();
        let resume_thread = resume_requested.clone();

        thread::spawn(move || {
            if let Err(e) = run_level_meter(device, level_thread, stopped_thread, resume_thread, &events) {
                error!("Audio level monitor error: {}", e);
                let _ = events.send(DeviceEvent::StreamLost);
            }
        });

        Ok(Self {
            level_bits,
            stopped,
            resume_requested,
        })
    }
}

impl AudioLevelMonitor for CpalLevelMonitor {
    fn level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resume_requested.store(true, Ordering::SeqCst);
    }
}

fn run_level_meter(
    device: cpal::Device,
    level_bits: Arc<AtomicU32>,
    stopped: Arc<AtomicBool>,
    resume_requested: Arc<AtomicBool>,
    events: &mpsc::UnboundedSender<DeviceEvent>,
) -> Result<(), AudioError> {
    let supported = device.default_input_config()?;
    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.clone().into();

    let err_events = events.clone();
    let err_callback = move |err| {
        error!("Audio monitor stream error: {}", err);
        let _ = err_events.send(DeviceEvent::StreamLost);
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => {
            let level = level_bits.clone();
            device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    level.store(rms_level(data, channels).to_bits(), Ordering::Relaxed);
                },
                err_callback,
                None,
            )?
        }
        SampleFormat::I16 => {
            let level = level_bits.clone();
            device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    let samples: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    level.store(rms_level(&samples, channels).to_bits(), Ordering::Relaxed);
                },
                err_callback,
                None,
            )?
        }
        format => return Err(AudioError::UnsupportedFormat(format!("{:?}", format))),
    };

    stream.play()?;

    while !stopped.load(Ordering::SeqCst) {
        if resume_requested.swap(false, Ordering::SeqCst) {
            if let Err(e) = stream.play() {
                warn!("Failed to resume audio monitor stream: {}", e);
            }
        }
        thread::sleep(Duration::from_millis(100));
    }

    drop(stream);
    level_bits.store(0f32.to_bits(), Ordering::Relaxed);
    Ok(())
}

/// RMS of the interleaved buffer, boosted into a useful meter range.
fn rms_level(data: &[f32], channels: usize) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let frames = data.len() / channels.max(1);
    if frames == 0 {
        return 0.0;
    }
    let sum_sq: f32 = data.iter().map(|&s| s * s).sum();
    let rms = (sum_sq / data.len() as f32).sqrt();
    (rms * 3.0).clamp(0.0, 1.0)
}

/// Start the recognizer audio feed on a dedicated thread.
///
/// Captures from the given device (default when `None`), mixes to mono,
/// resamples to `target_sample_rate` and emits fixed-size PCM16 chunks.
pub(crate) fn start_capture(
    device_id: Option<&str>,
    target_sample_rate: u32,
) -> Result<(AudioCaptureHandle, mpsc::Receiver<AudioChunk>), AudioError> {
    let device = find_input_device(device_id)?;
    let is_capturing = Arc::new(AtomicBool::new(true));
    let is_capturing_thread = is_capturing.clone();

    let (chunk_tx, chunk_rx) = mpsc::channel(600);

    let thread_handle = thread::spawn(move || {
        if let Err(e) = run_capture(device, is_capturing_thread, chunk_tx, target_sample_rate) {
            error!("Audio capture error: {}", e);
        }
    });

    Ok((
        AudioCaptureHandle {
            is_capturing,
            thread_handle: Some(thread_handle),
        },
        chunk_rx,
    ))
}

fn run_capture(
    device: cpal::Device,
    is_capturing: Arc<AtomicBool>,
    chunk_tx: mpsc::Sender<AudioChunk>,
    target_sample_rate: u32,
) -> Result<(), AudioError> {
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using audio input device: {}", device_name);

    // Prefer a config that supports the target rate natively
    let mut best_config = None;
    let mut found_target_rate = false;
    for config in device
        .supported_input_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
    {
        if config.channels() == 0 {
            continue;
        }
        if config.min_sample_rate().0 <= target_sample_rate
            && config.max_sample_rate().0 >= target_sample_rate
        {
            best_config = Some(config.with_sample_rate(cpal::SampleRate(target_sample_rate)));
            found_target_rate = true;
            break;
        } else if best_config.is_none() {
            best_config = Some(config.with_max_sample_rate());
        }
    }
    let supported_config = best_config.ok_or(AudioError::NoSupportedConfig)?;

    if !found_target_rate {
        warn!(
            "{}Hz not supported, capturing at {}Hz and resampling",
            target_sample_rate,
            supported_config.sample_rate().0
        );
    }

    let sample_format = supported_config.sample_format();
    let config: cpal::StreamConfig = supported_config.into();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels as usize;
    info!("Audio config: {} channels, {} Hz", channels, sample_rate);

    let mut pipeline = ChunkPipeline::new(sample_rate, target_sample_rate);
    let mut emit = move |chunk: AudioChunk| {
        // try_send keeps the audio callback non-blocking
        if chunk_tx.try_send(chunk).is_err() {
            warn!("Audio buffer overflow - chunk dropped");
        }
    };

    let err_callback = |err| {
        error!("Audio stream error: {}", err);
    };

    let is_capturing_stream = is_capturing.clone();
    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _| {
                if !is_capturing_stream.load(Ordering::SeqCst) {
                    return;
                }
                pipeline.push(data, channels, &mut emit);
            },
            err_callback,
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _| {
                if !is_capturing_stream.load(Ordering::SeqCst) {
                    return;
                }
                let samples: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                pipeline.push(&samples, channels, &mut emit);
            },
            err_callback,
            None,
        )?,
        format => return Err(AudioError::UnsupportedFormat(format!("{:?}", format))),
    };

    stream.play()?;
    info!("Audio capture started");

    while is_capturing.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    drop(stream);
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_level_is_zero_for_silence() {
        assert_eq!(rms_level(&[0.0; 512], 1), 0.0);
        assert_eq!(rms_level(&[], 1), 0.0);
    }

    #[test]
    fn rms_level_saturates_at_one() {
        let loud = vec![1.0f32; 512];
        assert_eq!(rms_level(&loud, 1), 1.0);
    }

    #[test]
    fn rms_level_scales_with_amplitude() {
        let quiet = vec![0.01f32; 512];
        let louder = vec![0.1f32; 512];
        assert!(rms_level(&quiet, 1) < rms_level(&louder, 1));
    }
}
