//! Ready-chime decode and cache
//!
//! The chime WAV is decoded once per process to raw 24 kHz i16 mono PCM
//! and cached; adapters write the cached bytes straight through their
//! speaker path. Decoding is validated aggressively: a loud leading
//! transient means a container header leaked into the PCM stream, and a
//! chime outside [0.5 s, 3.0 s] is the wrong asset entirely.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use voiceloop_core::resample;
use voiceloop_config::constants::audio::SYNTHESIS_SAMPLE_RATE;

use crate::TransportError;

/// Leading window that must be near-silent
const LEADING_SILENCE_MS: usize = 10;
/// Maximum sample magnitude inside the leading window
const LEADING_SILENCE_CEILING: i16 = 500;
/// Acceptable chime duration bounds, in milliseconds
const MIN_DURATION_MS: usize = 500;
const MAX_DURATION_MS: usize = 3_000;

static CACHE: Lazy<Mutex<HashMap<PathBuf, Arc<Vec<u8>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Decode, validate, and cache the chime at `path` as 24 kHz i16 LE
/// mono PCM. Subsequent calls for the same path hit the process-wide
/// cache.
pub fn load_chime(path: &Path) -> Result<Arc<Vec<u8>>, TransportError> {
    if let Some(cached) = CACHE.lock().get(path) {
        return Ok(cached.clone());
    }

    let samples = decode_wav(path)?;
    validate(&samples, path)?;

    let pcm = Arc::new(
        samples
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect::<Vec<u8>>(),
    );
    CACHE.lock().insert(path.to_path_buf(), pcm.clone());

    tracing::debug!(
        path = %path.display(),
        bytes = pcm.len(),
        "chime decoded and cached"
    );
    Ok(pcm)
}

/// Decode an arbitrary prompt WAV (startup greeting) to 24 kHz i16 LE
/// mono PCM, cached like the chime but without the chime's duration and
/// lead-in constraints.
pub fn load_prompt(path: &Path) -> Result<Arc<Vec<u8>>, TransportError> {
    if let Some(cached) = CACHE.lock().get(path) {
        return Ok(cached.clone());
    }

    let samples = decode_wav(path)?;
    let pcm = Arc::new(
        samples
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect::<Vec<u8>>(),
    );
    CACHE.lock().insert(path.to_path_buf(), pcm.clone());
    Ok(pcm)
}

/// Decode a WAV file to 24 kHz i16 mono samples.
fn decode_wav(path: &Path) -> Result<Vec<i16>, TransportError> {
    let reader = hound::WavReader::open(path).map_err(|e| {
        TransportError::Precondition(format!("cannot open chime {}: {}", path.display(), e))
    })?;

    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .filter_map(Result::ok)
            .collect(),
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .filter_map(Result::ok)
                .map(|s| s as f32 / max_val)
                .collect()
        },
    };

    // fold stereo to mono
    let samples: Vec<f32> = if spec.channels == 2 {
        samples
            .chunks(2)
            .map(|c| (c[0] + c.get(1).copied().unwrap_or(0.0)) / 2.0)
            .collect()
    } else {
        samples
    };

    let samples = resample(&samples, spec.sample_rate, SYNTHESIS_SAMPLE_RATE)
        .map_err(|e| TransportError::Precondition(format!("chime resample failed: {}", e)))?;

    Ok(samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect())
}

fn validate(samples: &[i16], path: &Path) -> Result<(), TransportError> {
    let rate = SYNTHESIS_SAMPLE_RATE as usize;
    let duration_ms = samples.len() * 1000 / rate;
    if !(MIN_DURATION_MS..=MAX_DURATION_MS).contains(&duration_ms) {
        return Err(TransportError::Precondition(format!(
            "chime {} is {} ms, expected {}..{} ms",
            path.display(),
            duration_ms,
            MIN_DURATION_MS,
            MAX_DURATION_MS
        )));
    }

    let leading = rate * LEADING_SILENCE_MS / 1000;
    let peak = samples
        .iter()
        .take(leading)
        .map(|s| s.unsigned_abs())
        .max()
        .unwrap_or(0);
    if peak >= LEADING_SILENCE_CEILING as u16 {
        return Err(TransportError::Precondition(format!(
            "chime {} starts at amplitude {} — a container header leaked into the PCM stream",
            path.display(),
            peak
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Write a 24 kHz mono WAV tone with `lead_silence_ms` of padding
    /// before a short fade-in, the way a real system tone is mastered.
    fn write_wav(path: &Path, lead_silence_ms: usize, duration_ms: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 24_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let total = 24_000 * duration_ms / 1000;
        let lead = 24_000 * lead_silence_ms / 1000;
        let fade = 24_000 * 20 / 1000; // 20 ms ramp after the silence
        for i in 0..total {
            let envelope = if i < lead {
                0.0
            } else if i < lead + fade {
                (i - lead) as f32 / fade as f32
            } else {
                1.0
            };
            let sample = ((i as f32 * 0.2).sin() * 0.5 * envelope * 32767.0) as i16;
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_chime_decodes_with_quiet_lead_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chime.wav");
        write_wav(&path, 15, 1000);

        let pcm = load_chime(&path).unwrap();
        // 1 s at 24 kHz i16 = 48 000 bytes
        assert_eq!(pcm.len(), 48_000);

        // first 10 ms near-silent
        let leading = 240usize;
        for chunk in pcm.chunks_exact(2).take(leading) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            assert!(sample.abs() < 500, "leading sample too loud: {sample}");
        }
    }

    #[test]
    fn test_chime_cache_returns_same_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cached.wav");
        write_wav(&path, 15, 800);

        let a = load_chime(&path).unwrap();
        let b = load_chime(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_loud_leading_transient_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("header_leak.wav");
        write_wav(&path, 0, 1000); // no fade: full amplitude from sample 0

        let err = load_chime(&path).unwrap_err();
        assert!(err.to_string().contains("header"), "got: {err}");
    }

    #[test]
    fn test_out_of_range_duration_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let short = dir.path().join("short.wav");
        write_wav(&short, 15, 100);
        assert!(load_chime(&short).is_err());

        let long = dir.path().join("long.wav");
        write_wav(&long, 15, 5000);
        assert!(load_chime(&long).is_err());
    }

    #[test]
    fn test_missing_file_is_precondition_failure() {
        let err = load_chime(Path::new("/nonexistent/chime.wav")).unwrap_err();
        assert!(matches!(err, TransportError::Precondition(_)));
    }
}
