//! Silero VAD v5 inference
//!
//! LSTM-based voice activity model running on ONNX Runtime. Works
//! directly on 512-sample 16 kHz waveform chunks; no mel filterbank.
//! Inference is stateful: the h/c LSTM tensors carry across frames and
//! are zeroed on reset.

use ndarray::Array2;
use ort::{session::builder::GraphOptimizationLevel, session::Session, value::Tensor};
use parking_lot::Mutex;
use std::path::Path;

use crate::PipelineError;

struct LstmState {
    /// Hidden state [2, 64]
    h: Array2<f32>,
    /// Cell state [2, 64]
    c: Array2<f32>,
}

/// Silero v5 model wrapper
pub struct SileroModel {
    session: Mutex<Session>,
    state: Mutex<LstmState>,
    sample_rate: u32,
}

impl SileroModel {
    /// Load the model from an ONNX file.
    pub fn load(model_path: impl AsRef<Path>, sample_rate: u32) -> Result<Self, PipelineError> {
        let session = Session::builder()
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .with_intra_threads(1)
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        Ok(Self {
            session: Mutex::new(session),
            // v5 uses 2 LSTM layers with 64-dim states
            state: Mutex::new(LstmState {
                h: Array2::zeros((2, 64)),
                c: Array2::zeros((2, 64)),
            }),
            sample_rate,
        })
    }

    /// Speech probability for one frame. The LSTM state lock is held for
    /// the whole call so concurrent frames cannot interleave inference
    /// and state update.
    pub fn infer(&self, frame: &[f32]) -> Result<f32, PipelineError> {
        let mut state = self.state.lock();

        let input = Array2::from_shape_vec((1, frame.len()), frame.to_vec())
            .map_err(|e| PipelineError::Vad(e.to_string()))?;
        let sr = ndarray::arr1(&[self.sample_rate as i64]);

        let input_tensor =
            Tensor::from_array(input).map_err(|e| PipelineError::Model(e.to_string()))?;
        let sr_tensor = Tensor::from_array(sr).map_err(|e| PipelineError::Model(e.to_string()))?;
        let h_tensor = Tensor::from_array(state.h.clone())
            .map_err(|e| PipelineError::Model(e.to_string()))?;
        let c_tensor = Tensor::from_array(state.c.clone())
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![
                "input" => input_tensor,
                "sr" => sr_tensor,
                "h" => h_tensor,
                "c" => c_tensor,
            ])
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let (_, probs) = outputs
            .get("output")
            .ok_or_else(|| PipelineError::Model("missing output tensor".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::Model(e.to_string()))?;
        let probability = probs.first().copied().unwrap_or(0.0);

        if let Some(hn) = outputs.get("hn") {
            let (shape, data) = hn
                .try_extract_tensor::<f32>()
                .map_err(|e| PipelineError::Model(e.to_string()))?;
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            if dims.len() == 2 && data.len() == dims[0] * dims[1] {
                let new_h = ndarray::ArrayView2::from_shape((dims[0], dims[1]), data)
                    .map_err(|e| PipelineError::Model(e.to_string()))?;
                state.h.assign(&new_h);
            }
        }

        if let Some(cn) = outputs.get("cn") {
            let (shape, data) = cn
                .try_extract_tensor::<f32>()
                .map_err(|e| PipelineError::Model(e.to_string()))?;
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            if dims.len() == 2 && data.len() == dims[0] * dims[1] {
                let new_c = ndarray::ArrayView2::from_shape((dims[0], dims[1]), data)
                    .map_err(|e| PipelineError::Model(e.to_string()))?;
                state.c.assign(&new_c);
            }
        }

        Ok(probability)
    }

    /// Zero the LSTM state without reloading the model.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.h.fill(0.0);
        state.c.fill(0.0);
    }
}
