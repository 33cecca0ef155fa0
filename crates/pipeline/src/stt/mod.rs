//! Offline speech recognition
//!
//! Speech-segment audio accumulates as a chunk list (no copying until
//! transcription), then a one-shot offline recognizer produces the final
//! transcript and the buffer is emptied. The model is a fixed triple of
//! files in the configured directory: `encoder.onnx`, `decoder.onnx`,
//! `tokens.txt` — all three are checked at construction.

#[cfg(feature = "onnx")]
mod recognizer;

#[cfg(feature = "onnx")]
pub use recognizer::OfflineRecognizer;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;

use voiceloop_core::{CoreError, SpeechRecognizer, Transcript};

use crate::PipelineError;

/// Required model files in the model directory
const MODEL_FILES: [&str; 3] = ["encoder.onnx", "decoder.onnx", "tokens.txt"];

/// STT configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Directory holding encoder.onnx, decoder.onnx, tokens.txt
    pub model_dir: PathBuf,
    /// Input sample rate (16 kHz)
    pub sample_rate: u32,
}

impl SttConfig {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            sample_rate: 16_000,
        }
    }
}

/// Accumulating offline STT processor
#[derive(Debug)]
pub struct SttProcessor {
    chunks: Mutex<Vec<Vec<f32>>>,
    #[cfg(feature = "onnx")]
    recognizer: OfflineRecognizer,
    #[cfg(not(feature = "onnx"))]
    _config: SttConfig,
}

impl SttProcessor {
    /// Construct the processor, failing fast when any model file is
    /// missing.
    pub fn new(config: SttConfig) -> Result<Self, PipelineError> {
        for name in MODEL_FILES {
            let path = config.model_dir.join(name);
            if !path.exists() {
                return Err(PipelineError::Model(format!(
                    "missing STT model file: {}",
                    path.display()
                )));
            }
        }

        #[cfg(feature = "onnx")]
        {
            let recognizer = OfflineRecognizer::load(&config.model_dir)?;
            tracing::info!(dir = %config.model_dir.display(), "loaded offline recognizer");
            Ok(Self {
                chunks: Mutex::new(Vec::new()),
                recognizer,
            })
        }

        #[cfg(not(feature = "onnx"))]
        {
            tracing::warn!("built without the onnx feature; transcripts will be empty");
            Ok(Self {
                chunks: Mutex::new(Vec::new()),
                _config: config,
            })
        }
    }

    /// Number of samples currently buffered.
    pub fn buffered_samples(&self) -> usize {
        self.chunks.lock().iter().map(|c| c.len()).sum()
    }

    fn take_samples(&self) -> Vec<f32> {
        let pending = std::mem::take(&mut *self.chunks.lock());
        match pending.len() {
            0 => Vec::new(),
            1 => pending.into_iter().next().unwrap_or_default(),
            _ => pending.concat(),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for SttProcessor {
    fn accumulate(&self, samples: Vec<f32>) {
        if !samples.is_empty() {
            self.chunks.lock().push(samples);
        }
    }

    async fn transcribe(&self) -> Result<Transcript, CoreError> {
        let samples = self.take_samples();
        if samples.is_empty() {
            return Ok(Transcript::new(""));
        }

        #[cfg(feature = "onnx")]
        {
            let text = self.recognizer.transcribe(&samples).map_err(CoreError::from)?;
            tracing::debug!(samples = samples.len(), text = %text, "transcribed segment");
            Ok(Transcript::new(text))
        }

        #[cfg(not(feature = "onnx"))]
        Ok(Transcript::new(""))
    }

    fn clear_buffer(&self) {
        self.chunks.lock().clear();
    }
}
