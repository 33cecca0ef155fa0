//! Streaming HTTP synthesis backend
//!
//! POSTs the utterance to a synthesis endpoint that answers with chunked
//! raw 24 kHz i16 LE PCM. Chunks are forwarded as they arrive so playback
//! starts before synthesis finishes.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use voiceloop_core::{CoreError, SynthesisBackend};
use voiceloop_config::constants::audio::SYNTHESIS_SAMPLE_RATE;

use crate::PipelineError;

/// HTTP backend configuration
#[derive(Debug, Clone)]
pub struct HttpSynthConfig {
    /// Streaming synthesis endpoint
    pub endpoint: String,
    /// Model identifier sent with each request
    pub model: String,
    /// Voice identifier sent with each request
    pub voice: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl HttpSynthConfig {
    pub fn new(endpoint: impl Into<String>, model: &str, voice: &str) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.to_string(),
            voice: voice.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Remote streaming synthesizer
pub struct HttpSynth {
    client: reqwest::Client,
    config: HttpSynthConfig,
    current: parking_lot::Mutex<Option<AbortHandle>>,
}

impl HttpSynth {
    pub fn new(config: HttpSynthConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Synthesis(e.to_string()))?;

        Ok(Self {
            client,
            config,
            current: parking_lot::Mutex::new(None),
        })
    }
}

#[async_trait]
impl SynthesisBackend for HttpSynth {
    async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<Vec<u8>>, CoreError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&json!({
                "model": self.config.model,
                "voice": self.config.voice,
                "text": text,
                "format": "pcm_24000",
            }))
            .send()
            .await
            .map_err(|e| CoreError::Synthesis(format!("synthesis request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::Synthesis(format!("HTTP {}: {}", status, body)));
        }

        let (tx, rx) = mpsc::channel::<Vec<u8>>(16);
        let task = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        if tx.send(bytes.to_vec()).await.is_err() {
                            break;
                        }
                    },
                    Err(e) => {
                        tracing::warn!("synthesis stream error: {}", e);
                        break;
                    },
                }
            }
        });

        *self.current.lock() = Some(task.abort_handle());
        Ok(rx)
    }

    async fn cancel(&self) {
        if let Some(handle) = self.current.lock().take() {
            handle.abort();
        }
    }

    fn sample_rate(&self) -> u32 {
        SYNTHESIS_SAMPLE_RATE
    }
}
