//! Agent session: a persistent bidirectional channel to the LLM backend
//!
//! The backend is spawned once per voice session and survives across
//! turns; spawn cost is paid up-front. User text goes in as
//! newline-delimited JSON; fine-grained streaming events come out and are
//! translated into the pipeline's [`voiceloop_core::AgentEvent`] grammar.

mod protocol;
mod session;

pub use protocol::{AssistantMessage, BackendLine, ContentBlock, Delta};
pub use session::{AgentSession, AgentSessionConfig, EventStream};

use thiserror::Error;

/// Agent session errors
#[derive(Debug, Error)]
pub enum AgentError {
    /// Backend binary could not be spawned
    #[error("failed to start agent backend: {0}")]
    Spawn(String),

    /// Backend process died; further sends will fail
    #[error("agent backend closed")]
    BackendClosed,

    /// Wire-level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
