//! Voice activity detection
//!
//! Accepts arbitrary-length f32 windows at 16 kHz, buffers them into
//! 512-sample frames, scores each frame with the configured engine, and
//! runs a confirmation/redemption state machine over the scores. Events:
//!
//! - `SpeechStart` — first frame whose probability crossed the threshold
//! - `SpeechContinue` — sustained speech beyond the confirmation window
//!   (used by the controller for interruption accounting)
//! - `SpeechEnd` — probability stayed below threshold for the redemption
//!   window (debounce against breath pauses)
//! - `Silence` — long-duration quiet
//!
//! The neural engine is Silero v5 via ONNX Runtime behind the `onnx`
//! feature; without it an RMS-energy score drives the same state machine.

#[cfg(feature = "onnx")]
mod silero;

#[cfg(feature = "onnx")]
pub use silero::SileroModel;

use parking_lot::Mutex;
use std::path::Path;

use voiceloop_core::rms_energy_db;
use voiceloop_config::constants::audio::VAD_FRAME_SAMPLES;

use crate::PipelineError;

/// VAD callback events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStart,
    SpeechContinue,
    SpeechEnd,
    Silence,
}

/// An event plus the probability of the frame that produced it
#[derive(Debug, Clone, Copy)]
pub struct VadObservation {
    pub event: VadEvent,
    pub probability: f32,
}

/// VAD configuration
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Speech probability activation threshold
    pub threshold: f32,
    /// Frame size in samples (512 at 16 kHz = 32 ms)
    pub frame_samples: usize,
    /// Sample rate (must be 16000 for the neural engine)
    pub sample_rate: u32,
    /// Confirmation window: frames of speech before SpeechContinue
    pub min_speech_frames: usize,
    /// Redemption window: frames of quiet before SpeechEnd
    pub min_silence_frames: usize,
    /// Quiet frames before a one-shot Silence event
    pub long_silence_frames: usize,
    /// Energy floor in dB for the fallback engine
    pub energy_floor_db: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            frame_samples: VAD_FRAME_SAMPLES,
            sample_rate: 16_000,
            min_speech_frames: 8,   // ~256 ms
            min_silence_frames: 22, // ~704 ms
            long_silence_frames: 150,
            energy_floor_db: -50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Quiet,
    Speech,
}

struct VadState {
    buffer: Vec<f32>,
    phase: Phase,
    speech_frames: usize,
    silence_frames: usize,
    quiet_frames: usize,
    silence_reported: bool,
}

impl VadState {
    fn new(frame_samples: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(frame_samples * 2),
            phase: Phase::Quiet,
            speech_frames: 0,
            silence_frames: 0,
            quiet_frames: 0,
            silence_reported: false,
        }
    }
}

enum Engine {
    #[cfg(feature = "onnx")]
    Silero(SileroModel),
    Energy,
}

/// Frame-buffered voice activity processor
pub struct VadProcessor {
    config: VadConfig,
    engine: Engine,
    state: Mutex<VadState>,
}

impl VadProcessor {
    /// Energy-based processor; no model required.
    pub fn energy(config: VadConfig) -> Self {
        Self {
            state: Mutex::new(VadState::new(config.frame_samples)),
            engine: Engine::Energy,
            config,
        }
    }

    /// Neural processor backed by a Silero ONNX model.
    #[cfg(feature = "onnx")]
    pub fn with_silero(
        model_path: impl AsRef<Path>,
        config: VadConfig,
    ) -> Result<Self, PipelineError> {
        let model = SileroModel::load(model_path, config.sample_rate)?;
        Ok(Self {
            state: Mutex::new(VadState::new(config.frame_samples)),
            engine: Engine::Silero(model),
            config,
        })
    }

    /// Load the neural engine when the model file is present, otherwise
    /// fall back to energy-based detection.
    pub fn from_model_path(model_path: &Path, config: VadConfig) -> Self {
        #[cfg(feature = "onnx")]
        if model_path.exists() {
            match Self::with_silero(model_path, config.clone()) {
                Ok(vad) => {
                    tracing::info!(path = %model_path.display(), "using neural VAD");
                    return vad;
                },
                Err(e) => {
                    tracing::warn!("failed to load VAD model: {}, falling back to energy", e);
                },
            }
        }

        #[cfg(not(feature = "onnx"))]
        let _ = model_path;

        tracing::info!("using energy-based VAD");
        Self::energy(config)
    }

    /// Feed a window of samples; returns zero or more observations, one
    /// per internal frame that produced a state change.
    pub fn process(&self, window: &[f32]) -> Result<Vec<VadObservation>, PipelineError> {
        let mut state = self.state.lock();
        state.buffer.extend_from_slice(window);

        let mut observations = Vec::new();
        while state.buffer.len() >= self.config.frame_samples {
            let frame: Vec<f32> = state.buffer.drain(..self.config.frame_samples).collect();
            let probability = self.score(&frame)?;
            let is_speech = probability >= self.config.threshold;

            if let Some(event) = self.step(&mut state, is_speech) {
                observations.push(VadObservation { event, probability });
            }
        }

        Ok(observations)
    }

    /// Score one frame with the configured engine.
    fn score(&self, frame: &[f32]) -> Result<f32, PipelineError> {
        match &self.engine {
            #[cfg(feature = "onnx")]
            Engine::Silero(model) => {
                // Skip inference on obvious silence
                if rms_energy_db(frame) < self.config.energy_floor_db {
                    return Ok(0.0);
                }
                model.infer(frame)
            },
            Engine::Energy => Ok(energy_probability(frame, self.config.energy_floor_db)),
        }
    }

    /// Advance the confirmation/redemption state machine by one frame.
    ///
    /// Every SpeechStart is paired with exactly one SpeechEnd before the
    /// next SpeechStart can be emitted.
    fn step(&self, state: &mut VadState, is_speech: bool) -> Option<VadEvent> {
        match (state.phase, is_speech) {
            (Phase::Quiet, true) => {
                state.phase = Phase::Speech;
                state.speech_frames = 1;
                state.silence_frames = 0;
                state.quiet_frames = 0;
                state.silence_reported = false;
                Some(VadEvent::SpeechStart)
            },

            (Phase::Quiet, false) => {
                state.quiet_frames += 1;
                if state.quiet_frames == self.config.long_silence_frames && !state.silence_reported
                {
                    state.silence_reported = true;
                    Some(VadEvent::Silence)
                } else {
                    None
                }
            },

            (Phase::Speech, true) => {
                state.silence_frames = 0;
                state.speech_frames += 1;
                if state.speech_frames >= self.config.min_speech_frames {
                    Some(VadEvent::SpeechContinue)
                } else {
                    None
                }
            },

            (Phase::Speech, false) => {
                state.silence_frames += 1;
                if state.silence_frames >= self.config.min_silence_frames {
                    state.phase = Phase::Quiet;
                    state.speech_frames = 0;
                    state.silence_frames = 0;
                    state.quiet_frames = 0;
                    Some(VadEvent::SpeechEnd)
                } else {
                    None
                }
            },
        }
    }

    /// Return to the initial non-speech state without reloading the model.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let frame_samples = self.config.frame_samples;
        *state = VadState::new(frame_samples);

        #[cfg(feature = "onnx")]
        if let Engine::Silero(model) = &self.engine {
            model.reset();
        }
    }

    /// Whether a speech segment is currently open.
    pub fn speech_active(&self) -> bool {
        self.state.lock().phase == Phase::Speech
    }
}

/// Map frame energy to a pseudo-probability for the fallback engine.
fn energy_probability(frame: &[f32], floor_db: f32) -> f32 {
    let energy_db = rms_energy_db(frame);
    let threshold_db = floor_db + 10.0;
    if energy_db > threshold_db {
        ((energy_db - threshold_db) / 30.0).clamp(0.0, 1.0)
    } else {
        0.0
    }
}
