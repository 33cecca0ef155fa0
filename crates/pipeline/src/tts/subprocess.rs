//! Subprocess synthesis backend
//!
//! Drives a single long-lived synthesizer helper. The helper prints
//! `READY` on stderr once its model is loaded, then accepts
//! newline-delimited JSON commands on stdin (`generate`, `interrupt`,
//! `quit`) and writes utterances to stdout as a sequence of chunks, each
//! a 4-byte big-endian length followed by that many bytes of raw 24 kHz
//! i16 LE PCM. A zero length marks end of utterance.
//!
//! The helper cannot be hard-aborted mid-utterance, so a cancelled
//! generation is drained to its end sentinel before the next one starts
//! reading — stale PCM never reaches a later receiver.

use async_trait::async_trait;
use serde_json::json;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use voiceloop_core::{CoreError, SynthesisBackend};
use voiceloop_config::constants::audio::SYNTHESIS_SAMPLE_RATE;

use crate::PipelineError;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Subprocess backend configuration
#[derive(Debug, Clone)]
pub struct SubprocessSynthConfig {
    /// Helper command
    pub command: String,
    /// Helper arguments (model, voice)
    pub args: Vec<String>,
    /// Deadline for the READY handshake
    pub ready_timeout: Duration,
}

impl SubprocessSynthConfig {
    pub fn new(command: impl Into<String>, model: &str, voice: &str) -> Self {
        Self {
            command: command.into(),
            args: vec![
                "--model".to_string(),
                model.to_string(),
                "--voice".to_string(),
                voice.to_string(),
            ],
            ready_timeout: Duration::from_secs(60),
        }
    }
}

/// Long-lived synthesizer helper process
pub struct SubprocessSynth {
    writer: Arc<Mutex<BoxedWriter>>,
    reader: Arc<Mutex<BufReader<BoxedReader>>>,
    /// Discard flag of the generation currently holding the reader
    current_discard: parking_lot::Mutex<Arc<AtomicBool>>,
    child: parking_lot::Mutex<Option<Child>>,
}

impl SubprocessSynth {
    /// Spawn the helper and wait for its READY handshake.
    pub async fn spawn(config: SubprocessSynthConfig) -> Result<Self, PipelineError> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PipelineError::Synthesis(format!("failed to spawn {}: {}", config.command, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::Synthesis("helper stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::Synthesis("helper stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PipelineError::Synthesis("helper stderr unavailable".to_string()))?;

        // READY on stderr signals the model is loaded
        let mut stderr_lines = BufReader::new(stderr).lines();
        let handshake = async {
            while let Some(line) = stderr_lines.next_line().await? {
                if line.trim() == "READY" {
                    return Ok(());
                }
                tracing::debug!(target: "tts_helper", "{}", line);
            }
            Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "helper exited before READY",
            ))
        };

        tokio::time::timeout(config.ready_timeout, handshake)
            .await
            .map_err(|_| {
                PipelineError::Synthesis(format!(
                    "synthesizer helper not READY within {:?}",
                    config.ready_timeout
                ))
            })?
            .map_err(|e: std::io::Error| PipelineError::Synthesis(e.to_string()))?;

        // keep draining diagnostics for the life of the helper
        tokio::spawn(async move {
            while let Ok(Some(line)) = stderr_lines.next_line().await {
                tracing::debug!(target: "tts_helper", "{}", line);
            }
        });

        tracing::info!(command = %config.command, "synthesizer helper ready");

        let mut synth = Self::from_io(Box::new(stdin) as BoxedWriter, Box::new(stdout) as BoxedReader);
        *synth.child.get_mut() = Some(child);
        Ok(synth)
    }

    /// Build from raw streams. Used by tests to script the helper side
    /// of the protocol without spawning a process.
    pub fn from_io(
        writer: impl AsyncWrite + Send + Unpin + 'static,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            reader: Arc::new(Mutex::new(BufReader::new(
                Box::new(reader) as BoxedReader
            ))),
            current_discard: parking_lot::Mutex::new(Arc::new(AtomicBool::new(false))),
            child: parking_lot::Mutex::new(None),
        }
    }

    async fn send_command(&self, command: serde_json::Value) -> Result<(), CoreError> {
        let line = format!("{}\n", command);
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| CoreError::Synthesis(format!("helper write failed: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| CoreError::Synthesis(format!("helper flush failed: {}", e)))?;
        Ok(())
    }

    /// Ask the helper to exit and reap it.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        let _ = self.send_command(json!({"cmd": "quit"})).await;
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            let _ = child.wait().await;
        }
        Ok(())
    }
}

#[async_trait]
impl SynthesisBackend for SubprocessSynth {
    async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<Vec<u8>>, CoreError> {
        self.send_command(json!({"cmd": "generate", "text": text}))
            .await?;

        // Waiting on the reader lock serializes generations: a cancelled
        // predecessor holds it until its end sentinel is drained.
        let mut reader = self.reader.clone().lock_owned().await;

        let discard = Arc::new(AtomicBool::new(false));
        *self.current_discard.lock() = discard.clone();

        let (tx, rx) = mpsc::channel::<Vec<u8>>(16);
        tokio::spawn(async move {
            let mut forward = true;
            loop {
                let mut len_buf = [0u8; 4];
                if reader.read_exact(&mut len_buf).await.is_err() {
                    break;
                }
                let len = u32::from_be_bytes(len_buf) as usize;
                if len == 0 {
                    break; // end of utterance
                }

                let mut chunk = vec![0u8; len];
                if reader.read_exact(&mut chunk).await.is_err() {
                    break;
                }

                if discard.load(Ordering::Relaxed) || !forward {
                    continue; // drain stale PCM to the sentinel
                }
                if tx.send(chunk).await.is_err() {
                    // receiver dropped; keep draining so the next
                    // generation starts on a clean stream
                    forward = false;
                }
            }
        });

        Ok(rx)
    }

    async fn cancel(&self) {
        self.current_discard.lock().store(true, Ordering::Relaxed);
        let _ = self.send_command(json!({"cmd": "interrupt"})).await;
    }

    fn sample_rate(&self) -> u32 {
        SYNTHESIS_SAMPLE_RATE
    }
}
