//! Mixdown, resampling and chunking for the recognizer audio feed

use super::types::AudioChunk;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::{error, info};

/// Output chunk size in samples (0.1 seconds of audio at 16kHz).
pub(crate) const CHUNK_SIZE: usize = 1600;

/// Stateful pipeline turning interleaved device frames into fixed-size mono
/// PCM16 chunks at the target rate.
///
/// Runs inside the audio callback, so it never allocates a resampler per call
/// and never blocks; completed chunks are handed to the `emit` callback.
pub(crate) struct ChunkPipeline {
    resampler: Option<SincFixedIn<f32>>,
    /// Input frames the resampler consumes per process call
    input_frames: usize,
    pending_in: Vec<f32>,
    pending_out: Vec<i16>,
    target_rate: u32,
}

impl ChunkPipeline {
    pub(crate) fn new(input_rate: u32, target_rate: u32) -> Self {
        let (resampler, input_frames) = if input_rate != target_rate {
            info!("Creating resampler: {} Hz -> {} Hz", input_rate, target_rate);
            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };
            let input_frames =
                (CHUNK_SIZE as f64 * input_rate as f64 / target_rate as f64).ceil() as usize;
            match SincFixedIn::<f32>::new(
                target_rate as f64 / input_rate as f64,
                2.0,
                params,
                input_frames,
                1, // mono
            ) {
                Ok(resampler) => (Some(resampler), input_frames),
                Err(e) => {
                    // Degrade to passthrough; the service copes with off-rate audio
                    error!("Failed to create resampler: {}", e);
                    (None, CHUNK_SIZE)
                }
            }
        } else {
            (None, CHUNK_SIZE)
        };

        Self {
            resampler,
            input_frames,
            pending_in: Vec::with_capacity(input_frames * 2),
            pending_out: Vec::with_capacity(CHUNK_SIZE * 2),
            target_rate,
        }
    }

    /// Feed interleaved f32 frames; emits any completed chunks.
    pub(crate) fn push(
        &mut self,
        data: &[f32],
        channels: usize,
        emit: &mut dyn FnMut(AudioChunk),
    ) {
        if channels > 1 {
            self.pending_in.extend(
                data.chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        } else {
            self.pending_in.extend_from_slice(data);
        }

        match &mut self.resampler {
            Some(resampler) => {
                while self.pending_in.len() >= self.input_frames {
                    let block: Vec<f32> = self.pending_in.drain(..self.input_frames).collect();
                    match resampler.process(&[block], None) {
                        Ok(resampled) => {
                            self.pending_out.extend(
                                resampled[0]
                                    .iter()
                                    .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16),
                            );
                        }
                        Err(e) => error!("Resampling error: {}", e),
                    }
                }
            }
            None => {
                self.pending_out.extend(
                    self.pending_in
                        .drain(..)
                        .map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16),
                );
            }
        }

        while self.pending_out.len() >= CHUNK_SIZE {
            let samples: Vec<i16> = self.pending_out.drain(..CHUNK_SIZE).collect();
            emit(AudioChunk {
                samples,
                sample_rate: self.target_rate,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_emits_fixed_size_chunks() {
        let mut pipeline = ChunkPipeline::new(16_000, 16_000);
        let mut chunks = Vec::new();
        let frames = vec![0.5f32; CHUNK_SIZE + CHUNK_SIZE / 2];
        pipeline.push(&frames, 1, &mut |c| chunks.push(c));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples.len(), CHUNK_SIZE);
        assert_eq!(chunks[0].sample_rate, 16_000);
        // Remainder stays buffered for the next callback
        pipeline.push(&frames, 1, &mut |c| chunks.push(c));
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn stereo_frames_are_mixed_down() {
        let mut pipeline = ChunkPipeline::new(16_000, 16_000);
        let mut chunks = Vec::new();
        // L=1.0, R=0.0 should average to ~0.5
        let frames: Vec<f32> = (0..CHUNK_SIZE * 2)
            .map(|i| if i % 2 == 0 { 1.0 } else { 0.0 })
            .collect();
        pipeline.push(&frames, 2, &mut |c| chunks.push(c));
        assert_eq!(chunks.len(), 1);
        let mid = chunks[0].samples[CHUNK_SIZE / 2];
        assert!((mid - 16383).abs() <= 1, "expected ~half scale, got {}", mid);
    }

    #[test]
    fn resampling_halves_a_double_rate_input() {
        let mut pipeline = ChunkPipeline::new(32_000, 16_000);
        let mut emitted = 0usize;
        // 2 seconds at 32kHz should yield ~2 seconds at 16kHz
        for _ in 0..20 {
            let frames = vec![0.1f32; 3200];
            pipeline.push(&frames, 1, &mut |c| emitted += c.samples.len());
        }
        let expected = 32_000; // 2s * 16kHz
        let tolerance = CHUNK_SIZE * 2;
        assert!(
            emitted + tolerance >= expected && emitted <= expected + tolerance,
            "emitted {} samples",
            emitted
        );
    }
}
