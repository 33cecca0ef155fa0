//! Audio pipeline: VAD, STT, endpointing, narration, and TTS
//!
//! Each module is an independently-producing-and-consuming component; the
//! session controller (in `voiceloop-session`) owns one of each and wires
//! them together. Nothing here knows about transports beyond the
//! [`voiceloop_core::AudioTransport`] trait the TTS player writes to.

pub mod endpoint;
pub mod narrator;
pub mod stt;
pub mod tts;
pub mod vad;

pub use endpoint::{EndpointConfig, Endpointer};
pub use narrator::Narrator;
pub use stt::{SttConfig, SttProcessor};
pub use tts::{
    HttpSynth, HttpSynthConfig, SentenceBuffer, SubprocessSynth, SubprocessSynthConfig, TtsPlayer,
    TtsPlayerConfig,
};
pub use vad::{VadConfig, VadEvent, VadObservation, VadProcessor};

use thiserror::Error;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Model loading or inference failure
    #[error("model error: {0}")]
    Model(String),

    /// Voice activity detection failure
    #[error("VAD error: {0}")]
    Vad(String),

    /// Speech recognition failure
    #[error("STT error: {0}")]
    Stt(String),

    /// Speech synthesis failure
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Helper-process I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PipelineError> for voiceloop_core::CoreError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Model(m) => voiceloop_core::CoreError::Precondition(m),
            PipelineError::Stt(m) => voiceloop_core::CoreError::Recognition(m),
            PipelineError::Synthesis(m) => voiceloop_core::CoreError::Synthesis(m),
            PipelineError::Vad(m) => voiceloop_core::CoreError::Audio(m),
            PipelineError::Io(e) => voiceloop_core::CoreError::Audio(e.to_string()),
        }
    }
}
