//! Audio sample-rate types and PCM utilities
//!
//! The pipeline works with three canonical rates: 16 kHz for analysis
//! (VAD/STT), 24 kHz for synthesis (TTS), and 8 kHz on the telephony wire.
//! Samples are normalized f32 in [-1.0, 1.0] at module boundaries and
//! 16-bit signed little-endian on the wire.

use crate::CoreError;

/// PCM16 normalization divisor (wire → f32)
pub const PCM16_NORMALIZE: f32 = 32768.0;
/// PCM16 scale multiplier (f32 → wire)
pub const PCM16_SCALE: f32 = 32767.0;

/// Sample rates used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum SampleRate {
    /// 8 kHz - telephony wire
    Hz8000,
    /// 16 kHz - analysis (VAD/STT)
    #[default]
    Hz16000,
    /// 24 kHz - synthesis (TTS)
    Hz24000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz24000 => 24000,
        }
    }

    /// Samples per millisecond at this rate
    pub fn samples_per_ms(&self) -> usize {
        self.as_u32() as usize / 1000
    }

    /// Frame size in samples for a given duration
    pub fn frame_size(&self, ms: u32) -> usize {
        (self.as_u32() as usize * ms as usize) / 1000
    }
}

/// Convert PCM16 little-endian bytes to normalized f32 samples.
///
/// A trailing odd byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            sample as f32 / PCM16_NORMALIZE
        })
        .collect()
}

/// Convert normalized f32 samples to PCM16 little-endian bytes.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            let clamped = sample.clamp(-1.0, 1.0);
            let pcm16 = (clamped * PCM16_SCALE) as i16;
            pcm16.to_le_bytes()
        })
        .collect()
}

/// RMS energy of a sample window in decibels. Empty or silent input
/// returns the -96 dB floor.
pub fn rms_energy_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return -96.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    let rms = (sum_squares / samples.len() as f32).sqrt();

    if rms > 0.0 {
        20.0 * rms.log10()
    } else {
        -96.0
    }
}

/// Resample mono audio between arbitrary rates. The remote transports
/// feed this with whatever rate the browser's audio context picked.
///
/// Uses an FFT-based resampler for quality; very short buffers fall back to
/// linear interpolation, which the FFT resampler cannot handle.
pub fn resample(samples: &[f32], from_hz: u32, to_hz: u32) -> Result<Vec<f32>, CoreError> {
    use rubato::{FftFixedIn, Resampler};

    if from_hz == to_hz {
        return Ok(samples.to_vec());
    }
    if from_hz == 0 || to_hz == 0 {
        return Err(CoreError::Audio("zero sample rate".to_string()));
    }

    if samples.len() < 64 {
        return Ok(resample_linear(samples, from_hz, to_hz));
    }

    let from_rate = from_hz as usize;
    let to_rate = to_hz as usize;
    let chunk_size = samples.len().min(1024);

    let samples_f64: Vec<f64> = samples.iter().map(|&s| s as f64).collect();

    match FftFixedIn::<f64>::new(from_rate, to_rate, chunk_size, 2, 1) {
        Ok(mut resampler) => {
            let input_frames = vec![samples_f64];
            match resampler.process(&input_frames, None) {
                Ok(output_frames) => Ok(output_frames[0].iter().map(|&s| s as f32).collect()),
                Err(e) => {
                    tracing::warn!("resampler processing failed, using linear fallback: {}", e);
                    Ok(resample_linear(samples, from_hz, to_hz))
                },
            }
        },
        Err(e) => {
            tracing::warn!("resampler init failed, using linear fallback: {}", e);
            Ok(resample_linear(samples, from_hz, to_hz))
        },
    }
}

/// Linear-interpolation fallback for short frames.
fn resample_linear(samples: &[f32], from_hz: u32, to_hz: u32) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let ratio = to_hz as f64 / from_hz as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;

    let mut resampled = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx_floor = src_idx.floor() as usize;
        let idx_ceil = (idx_floor + 1).min(samples.len().saturating_sub(1));
        let frac = (src_idx - idx_floor as f64) as f32;

        let sample = samples[idx_floor] * (1.0 - frac) + samples[idx_ceil] * frac;
        resampled.push(sample);
    }

    resampled
}
