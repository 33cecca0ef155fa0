//! One-shot offline recognizer
//!
//! Encoder/decoder ONNX pair with a plain-text token table. The encoder
//! consumes the raw 16 kHz waveform, the decoder maps encoder states to
//! per-frame vocabulary logits, and a greedy CTC pass (collapse repeats,
//! drop blanks) produces the text.

use ndarray::{Array2, Array3};
use ort::{session::builder::GraphOptimizationLevel, session::Session, value::Tensor};
use parking_lot::Mutex;
use std::path::Path;

use crate::PipelineError;

/// Blank token id in the CTC vocabulary
const BLANK_ID: usize = 0;

pub struct OfflineRecognizer {
    encoder: Mutex<Session>,
    decoder: Mutex<Session>,
    tokens: Vec<String>,
}

impl OfflineRecognizer {
    /// Load the encoder/decoder pair and the token table.
    pub fn load(model_dir: &Path) -> Result<Self, PipelineError> {
        let encoder = Self::load_session(&model_dir.join("encoder.onnx"))?;
        let decoder = Self::load_session(&model_dir.join("decoder.onnx"))?;
        let tokens = Self::load_tokens(&model_dir.join("tokens.txt"))?;

        Ok(Self {
            encoder: Mutex::new(encoder),
            decoder: Mutex::new(decoder),
            tokens,
        })
    }

    fn load_session(path: &Path) -> Result<Session, PipelineError> {
        Session::builder()
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| PipelineError::Model(format!("{}: {}", path.display(), e)))
    }

    /// Token table format: one `<token> <id>` pair per line.
    fn load_tokens(path: &Path) -> Result<Vec<String>, PipelineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Model(format!("{}: {}", path.display(), e)))?;

        let mut entries: Vec<(usize, String)> = Vec::new();
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let (Some(token), Some(id)) = (parts.next(), parts.next()) else {
                continue;
            };
            let id: usize = id
                .parse()
                .map_err(|_| PipelineError::Model(format!("bad token id in {}", path.display())))?;
            entries.push((id, token.to_string()));
        }

        if entries.is_empty() {
            return Err(PipelineError::Model(format!(
                "empty token table: {}",
                path.display()
            )));
        }

        let max_id = entries.iter().map(|(id, _)| *id).max().unwrap_or(0);
        let mut tokens = vec![String::new(); max_id + 1];
        for (id, token) in entries {
            tokens[id] = token;
        }
        Ok(tokens)
    }

    /// Transcribe a full speech segment.
    pub fn transcribe(&self, samples: &[f32]) -> Result<String, PipelineError> {
        let encoder_out = self.run_encoder(samples)?;
        let logits = self.run_decoder(encoder_out)?;
        Ok(self.greedy_decode(&logits))
    }

    /// Encoder: waveform [1, T] → states [1, frames, dim]
    fn run_encoder(&self, samples: &[f32]) -> Result<Array3<f32>, PipelineError> {
        let audio = Array2::from_shape_vec((1, samples.len()), samples.to_vec())
            .map_err(|e| PipelineError::Stt(e.to_string()))?;
        let audio_tensor =
            Tensor::from_array(audio).map_err(|e| PipelineError::Model(e.to_string()))?;

        let mut encoder = self.encoder.lock();
        let outputs = encoder
            .run(ort::inputs!["audio" => audio_tensor])
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let (shape, data) = outputs
            .get("encoder_out")
            .ok_or_else(|| PipelineError::Model("missing encoder_out tensor".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        if dims.len() != 3 {
            return Err(PipelineError::Model(format!(
                "unexpected encoder_out rank: {:?}",
                dims
            )));
        }

        Array3::from_shape_vec((dims[0], dims[1], dims[2]), data.to_vec())
            .map_err(|e| PipelineError::Stt(e.to_string()))
    }

    /// Decoder: states → logits [1, frames, vocab]
    fn run_decoder(&self, encoder_out: Array3<f32>) -> Result<Array3<f32>, PipelineError> {
        let input =
            Tensor::from_array(encoder_out).map_err(|e| PipelineError::Model(e.to_string()))?;

        let mut decoder = self.decoder.lock();
        let outputs = decoder
            .run(ort::inputs!["encoder_out" => input])
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let (shape, data) = outputs
            .get("logits")
            .ok_or_else(|| PipelineError::Model("missing logits tensor".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        if dims.len() != 3 {
            return Err(PipelineError::Model(format!(
                "unexpected logits rank: {:?}",
                dims
            )));
        }

        Array3::from_shape_vec((dims[0], dims[1], dims[2]), data.to_vec())
            .map_err(|e| PipelineError::Stt(e.to_string()))
    }

    /// Greedy CTC: per-frame argmax, collapse repeats, drop blanks.
    fn greedy_decode(&self, logits: &Array3<f32>) -> String {
        let frames = logits.shape()[1];
        let vocab = logits.shape()[2];

        let mut ids = Vec::with_capacity(frames);
        let mut prev = BLANK_ID;
        for t in 0..frames {
            let mut best = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for v in 0..vocab {
                let score = logits[[0, t, v]];
                if score > best_score {
                    best_score = score;
                    best = v;
                }
            }
            if best != BLANK_ID && best != prev {
                ids.push(best);
            }
            prev = best;
        }

        let mut text = String::new();
        for id in ids {
            if let Some(token) = self.tokens.get(id) {
                text.push_str(token);
            }
        }
        // sentencepiece word-boundary marker
        text.replace('▁', " ").trim().to_string()
    }
}
