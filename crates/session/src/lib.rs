//! Voice session: the state machine binding capture, VAD, STT,
//! endpointing, the agent, narration, and TTS into conversational turns
//! — with correct behavior under barge-in.
//!
//! Also home to the cross-process session lock that caps concurrent
//! live sessions per host.

pub mod controller;
pub mod lock;

pub use controller::{ControllerConfig, SessionEvent, VoiceSession};
pub use lock::{default_lock_dir, SessionLock};

use thiserror::Error;

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Live-session cap reached
    #[error("session limit reached: {active} of {max} sessions active")]
    SessionLimit { active: usize, max: usize },

    /// Lock-file filesystem failure
    #[error("lock error: {0}")]
    Lock(#[from] std::io::Error),

    /// Component failure surfaced to the controller
    #[error(transparent)]
    Core(#[from] voiceloop_core::CoreError),

    /// Agent backend failure
    #[error(transparent)]
    Agent(#[from] voiceloop_agent::AgentError),
}
