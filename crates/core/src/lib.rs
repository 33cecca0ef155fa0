//! Core types and traits for the voiceloop pipeline
//!
//! This crate provides the foundational vocabulary shared by every other
//! crate in the workspace:
//! - Audio sample-rate types, PCM conversion, and resampling
//! - Telephony codecs (G.711 μ-law) and rate converters
//! - The session/agent/endpointing sum types
//! - Traits for pluggable backends (transport, synthesis, recognition)
//! - The core error type

pub mod audio;
pub mod codec;
pub mod error;
pub mod events;
pub mod traits;

pub use audio::{f32_to_pcm16, pcm16_to_f32, resample, rms_energy_db, SampleRate};
pub use codec::{downsample_24k_8k, ulaw_decode, ulaw_encode, upsample_8k_16k};
pub use error::CoreError;
pub use events::{AgentEvent, EndpointDecision, EndpointMethod, SessionState, TextChunk, Transcript};
pub use traits::{AudioTransport, SemanticClassifier, SpeechRecognizer, SynthesisBackend};
