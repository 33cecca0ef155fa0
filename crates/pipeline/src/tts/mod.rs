//! Speech synthesis and playback
//!
//! Text chunks flow through sentence buffering into a synthesis backend
//! (long-lived helper subprocess or streaming HTTP endpoint), and the
//! resulting 24 kHz PCM is written to the audio transport with playback
//! timing tracked so callers can await the actual drain.

mod http;
mod player;
mod sentence;
mod subprocess;

pub use http::{HttpSynth, HttpSynthConfig};
pub use player::{TtsPlayer, TtsPlayerConfig};
pub use sentence::SentenceBuffer;
pub use subprocess::{SubprocessSynth, SubprocessSynthConfig};
