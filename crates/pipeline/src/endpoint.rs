//! Turn endpointing
//!
//! Decides whether a just-ended speech segment plus its transcript is a
//! complete user turn. Long transcripts complete on the word-count fast
//! path; short ones may consult an external semantic classifier, with a
//! deadline that forces completion rather than stalling the conversation.

use std::sync::Arc;
use std::time::Duration;

use voiceloop_core::{EndpointDecision, EndpointMethod, SemanticClassifier, Transcript};
use voiceloop_config::constants::endpointing;

/// Endpointer configuration
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Word count at or above which the turn completes without semantics
    pub min_word_count_for_fast_path: usize,
    /// Consult the semantic classifier for short transcripts
    pub enable_semantic_fallback: bool,
    /// Classifier deadline; overrun forces Complete(Timeout)
    pub max_silence_before_timeout_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            min_word_count_for_fast_path: endpointing::DEFAULT_MIN_WORD_COUNT_FAST_PATH,
            enable_semantic_fallback: false,
            max_silence_before_timeout_ms: endpointing::DEFAULT_MAX_SILENCE_BEFORE_TIMEOUT_MS,
        }
    }
}

/// Turn-completion decider. Holds no state across turns beyond the
/// `reset()` hook.
pub struct Endpointer {
    config: EndpointConfig,
    classifier: Option<Arc<dyn SemanticClassifier>>,
}

impl Endpointer {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            classifier: None,
        }
    }

    /// Attach a semantic classifier for the fallback path.
    pub fn with_classifier(mut self, classifier: Arc<dyn SemanticClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Decide whether the transcript-so-far completes the turn.
    pub async fn decide(&self, transcript: &Transcript) -> EndpointDecision {
        if transcript.word_count() >= self.config.min_word_count_for_fast_path {
            return EndpointDecision::Complete(EndpointMethod::VadFast);
        }

        if !self.config.enable_semantic_fallback {
            // conservative-latency default: silence already ran its course
            return EndpointDecision::Complete(EndpointMethod::VadFast);
        }

        let Some(classifier) = &self.classifier else {
            return EndpointDecision::Complete(EndpointMethod::VadFast);
        };

        let deadline = Duration::from_millis(self.config.max_silence_before_timeout_ms);
        match tokio::time::timeout(deadline, classifier.is_complete(&transcript.text)).await {
            Err(_) => {
                tracing::debug!("semantic classifier exceeded deadline, forcing completion");
                EndpointDecision::Complete(EndpointMethod::Timeout)
            },
            Ok(Ok(true)) => EndpointDecision::Complete(EndpointMethod::SemanticFallback),
            Ok(Ok(false)) => EndpointDecision::Incomplete,
            Ok(Err(e)) => {
                tracing::warn!("semantic classifier failed: {}, using fast path", e);
                EndpointDecision::Complete(EndpointMethod::VadFast)
            },
        }
    }

    /// Per-turn reset hook.
    pub fn reset(&self) {}
}
