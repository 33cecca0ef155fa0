//! Shared sum types for the voice session
//!
//! These are the tagged variants that cross component boundaries: session
//! state, agent stream events, narration chunks, and endpointing decisions.

use serde::{Deserialize, Serialize};

/// Voice session state. Exactly one value at a time; transitions are
/// driven by the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Session not started or stopped
    Idle,
    /// Waiting for user speech
    Listening,
    /// User turn complete, awaiting the agent
    Processing,
    /// Playing the agent's response
    Speaking,
}

/// Events yielded by the agent session's per-turn stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// A fragment of assistant text
    TextDelta(String),
    /// The agent started running a tool
    ToolStart(String),
    /// The agent's tool invocation finished
    ToolEnd,
    /// Turn terminator — no further events belong to this turn
    Result,
    /// Backend-reported failure
    Error(String),
}

/// A unit of speakable text flowing from the narrator to the TTS player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextChunk {
    /// A fragment buffered until a sentence boundary
    Streaming(String),
    /// A pre-formed sentence spoken immediately, bypassing buffering
    Flush(String),
}

impl TextChunk {
    /// The chunk's text regardless of variant
    pub fn text(&self) -> &str {
        match self {
            TextChunk::Streaming(t) | TextChunk::Flush(t) => t,
        }
    }
}

/// How an endpoint decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointMethod {
    /// Word-count fast path after VAD silence
    VadFast,
    /// Semantic classifier judged the turn complete
    SemanticFallback,
    /// Classifier exceeded its deadline; completion forced
    Timeout,
}

/// Whether a transcript-so-far is a complete user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDecision {
    Complete(EndpointMethod),
    Incomplete,
}

impl EndpointDecision {
    pub fn is_complete(&self) -> bool {
        matches!(self, EndpointDecision::Complete(_))
    }
}

/// A recognized utterance.
///
/// Text is whitespace-trimmed at construction. The finality flag is always
/// true for the offline recognizer in this pipeline but is carried so a
/// streaming recognizer could slot in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
}

impl Transcript {
    pub fn new(text: impl AsRef<str>) -> Self {
        Self {
            text: text.as_ref().trim().to_string(),
            is_final: true,
        }
    }

    /// Empty transcripts are silently discarded by the controller.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Whitespace-separated word count, used by the endpointer.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_trims() {
        let t = Transcript::new("  what time is it  ");
        assert_eq!(t.text, "what time is it");
        assert_eq!(t.word_count(), 4);
        assert!(t.is_final);
    }

    #[test]
    fn test_transcript_empty() {
        assert!(Transcript::new("   ").is_empty());
        assert_eq!(Transcript::new("").word_count(), 0);
    }

    #[test]
    fn test_chunk_text_accessor() {
        assert_eq!(TextChunk::Streaming("a".into()).text(), "a");
        assert_eq!(TextChunk::Flush("b".into()).text(), "b");
    }

    #[test]
    fn test_endpoint_decision() {
        assert!(EndpointDecision::Complete(EndpointMethod::VadFast).is_complete());
        assert!(!EndpointDecision::Incomplete.is_complete());
    }

    #[test]
    fn test_session_state_serializes_lowercase() {
        let json = serde_json::to_string(&SessionState::Listening).unwrap();
        assert_eq!(json, "\"listening\"");
    }
}
