//! Traits for pluggable backends
//!
//! The session controller is written against these traits so that the two
//! transport surfaces (local device, WebSocket) and the two synthesis
//! backends (subprocess, streaming HTTP) are interchangeable, and so tests
//! can substitute scripted implementations.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{CoreError, Transcript};

/// Transport-agnostic audio adapter.
///
/// Delivers mic samples to the pipeline as 16 kHz mono f32 windows and
/// accepts 24 kHz i16 LE speaker PCM with backpressure. Interrupt clears
/// whatever the far side has buffered; resume re-enables writes after an
/// interrupt and is a no-op where the wire needs none.
#[async_trait]
pub trait AudioTransport: Send + Sync {
    /// Take the mic stream. Yields 16 kHz mono f32 windows of
    /// arbitrary length. The channel closing signals a fatal capture
    /// failure or a closed connection.
    ///
    /// May only be called once per transport; subsequent calls fail.
    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<f32>>, CoreError>;

    /// Write raw 24 kHz i16 LE mono PCM to the speaker. Blocks on
    /// backpressure. A closed wire is absorbed silently.
    async fn write_speaker(&self, pcm: &[u8]) -> Result<(), CoreError>;

    /// Clear the speaker buffer immediately and begin discarding writes.
    async fn interrupt(&self);

    /// Re-enable speaker writes after an interrupt.
    async fn resume(&self);

    /// Play the cached ready chime through the speaker path.
    async fn play_chime(&self) -> Result<(), CoreError>;

    /// Release all transport resources.
    async fn close(&self);
}

/// Streaming speech synthesizer.
///
/// `synthesize` returns a channel of raw 24 kHz i16 LE PCM chunks for one
/// utterance; the channel closes when the utterance is fully produced.
/// `cancel` aborts the in-flight utterance — implementations that cannot
/// cancel their backend must drain its stale output so no bytes from a
/// cancelled utterance ever reach a later receiver.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<Vec<u8>>, CoreError>;

    async fn cancel(&self);

    /// Output sample rate in Hz (24 000 for every current backend).
    fn sample_rate(&self) -> u32;
}

/// Offline speech recognizer over an accumulating sample buffer.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Append a window of 16 kHz samples to the pending buffer.
    fn accumulate(&self, samples: Vec<f32>);

    /// Transcribe everything accumulated and clear the buffer. An empty
    /// buffer yields an empty transcript without invoking the model.
    async fn transcribe(&self) -> Result<Transcript, CoreError>;

    /// Discard the pending buffer.
    fn clear_buffer(&self);
}

/// External classifier consulted by the endpointer's semantic fallback.
#[async_trait]
pub trait SemanticClassifier: Send + Sync {
    /// Whether the transcript reads as a complete user turn.
    async fn is_complete(&self, transcript: &str) -> Result<bool, CoreError>;
}
