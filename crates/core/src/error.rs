//! Core error type

use thiserror::Error;

/// Errors surfaced across component boundaries.
///
/// Each crate wraps its own failures into the variant matching the
/// component that produced them; the session controller is the final
/// consumer and never lets these escape the session boundary.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Audio conversion or resampling failure
    #[error("audio error: {0}")]
    Audio(String),

    /// Transport-level failure (device, helper process, wire)
    #[error("transport error: {0}")]
    Transport(String),

    /// Speech synthesis failure
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Speech recognition failure
    #[error("recognition error: {0}")]
    Recognition(String),

    /// A channel closed while a producer or consumer was still active
    #[error("channel closed")]
    ChannelClosed,

    /// Precondition not met (missing model, device, or binary)
    #[error("precondition failed: {0}")]
    Precondition(String),
}
