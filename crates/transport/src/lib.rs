//! Audio transports
//!
//! Implementations of [`voiceloop_core::AudioTransport`] for the two
//! surfaces the pipeline runs on: a local audio device behind an
//! echo-cancelling helper, and a remote WebSocket peer (browser or
//! telephony wire formats). Plus the ready chime decode/cache shared by
//! all of them.

pub mod chime;
pub mod local;
pub mod ws;

pub use chime::{load_chime, load_prompt};
pub use local::{HelperTransport, HelperTransportConfig, PulseTransport, PulseTransportConfig};
pub use ws::{OutboundFrame, WireFormat, WsTransport};

use thiserror::Error;

/// Transport construction errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Missing device, helper binary, or malformed chime
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Helper process misbehavior
    #[error("audio helper error: {0}")]
    Helper(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for voiceloop_core::CoreError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Precondition(m) => voiceloop_core::CoreError::Precondition(m),
            TransportError::Helper(m) => voiceloop_core::CoreError::Transport(m),
            TransportError::Io(e) => voiceloop_core::CoreError::Transport(e.to_string()),
        }
    }
}
