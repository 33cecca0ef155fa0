//! Native helper-binary transport
//!
//! Drives one long-lived helper process:
//! `<binary> <micRateHz> <speakerRateHz>` — stdout emits raw i16 LE mono
//! mic PCM at the mic rate, stdin accepts raw i16 LE mono speaker PCM at
//! the speaker rate, and stderr prints `READY` once the platform audio
//! pipeline (with echo cancellation) is initialized.
//!
//! SIGUSR1 clears the helper's playback ring buffer and begins
//! discarding stdin; SIGUSR2 resumes stdin processing. While discarding,
//! this side also drops writes locally so the pipe never backs up.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use voiceloop_core::{pcm16_to_f32, AudioTransport, CoreError};

use crate::chime::load_chime;
use crate::TransportError;

/// Stdout read size: 100 ms of 16 kHz i16 mono
const MIC_READ_BYTES: usize = 3200;

/// Helper transport configuration
#[derive(Debug, Clone)]
pub struct HelperTransportConfig {
    /// Helper binary path
    pub binary: PathBuf,
    /// Mic capture rate (stdout)
    pub mic_rate: u32,
    /// Speaker playback rate (stdin)
    pub speaker_rate: u32,
    /// Deadline for the READY handshake
    pub ready_timeout: Duration,
    /// Chime WAV decoded at init
    pub chime_path: PathBuf,
}

impl HelperTransportConfig {
    pub fn new(binary: impl Into<PathBuf>, chime_path: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            mic_rate: 16_000,
            speaker_rate: 24_000,
            ready_timeout: Duration::from_secs(10),
            chime_path: chime_path.into(),
        }
    }
}

/// Transport over the native echo-cancelling helper
pub struct HelperTransport {
    pid: i32,
    stdin: Mutex<tokio::process::ChildStdin>,
    discard: Arc<AtomicBool>,
    mic_rx: parking_lot::Mutex<Option<mpsc::Receiver<Vec<f32>>>>,
    chime: Arc<Vec<u8>>,
    child: parking_lot::Mutex<Option<Child>>,
}

impl HelperTransport {
    /// Spawn the helper and wait for its READY handshake.
    pub async fn start(config: HelperTransportConfig) -> Result<Self, TransportError> {
        let chime = load_chime(&config.chime_path)?;

        let mut child = Command::new(&config.binary)
            .arg(config.mic_rate.to_string())
            .arg(config.speaker_rate.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TransportError::Precondition(format!(
                    "cannot start audio helper {}: {}",
                    config.binary.display(),
                    e
                ))
            })?;

        let pid = child.id().map(|p| p as i32).ok_or_else(|| {
            TransportError::Helper("audio helper exited before startup".to_string())
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Helper("helper stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Helper("helper stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Helper("helper stderr unavailable".to_string()))?;

        // READY on stderr, within the startup deadline
        let mut stderr_lines = BufReader::new(stderr).lines();
        let handshake = async {
            while let Some(line) = stderr_lines.next_line().await? {
                if line.trim() == "READY" {
                    return Ok(());
                }
                tracing::debug!(target: "audio_helper", "{}", line);
            }
            Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "helper exited before READY",
            ))
        };
        tokio::time::timeout(config.ready_timeout, handshake)
            .await
            .map_err(|_| {
                TransportError::Helper(format!(
                    "audio helper not READY within {:?}",
                    config.ready_timeout
                ))
            })?
            .map_err(|e: std::io::Error| TransportError::Helper(e.to_string()))?;

        tokio::spawn(async move {
            while let Ok(Some(line)) = stderr_lines.next_line().await {
                tracing::debug!(target: "audio_helper", "{}", line);
            }
        });

        // mic pump: stdout → f32 windows. A helper exit is fatal to the
        // session and surfaces as the channel closing.
        let (mic_tx, mic_rx) = mpsc::channel::<Vec<f32>>(64);
        let mut stdout = stdout;
        tokio::spawn(async move {
            let mut buf = vec![0u8; MIC_READ_BYTES];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => {
                        tracing::error!("audio helper capture stream ended");
                        break;
                    },
                    Ok(n) => {
                        if mic_tx.send(pcm16_to_f32(&buf[..n])).await.is_err() {
                            break;
                        }
                    },
                    Err(e) => {
                        tracing::error!("audio helper read failed: {}", e);
                        break;
                    },
                }
            }
        });

        tracing::info!(binary = %config.binary.display(), pid, "audio helper ready");

        Ok(Self {
            pid,
            stdin: Mutex::new(stdin),
            discard: Arc::new(AtomicBool::new(false)),
            mic_rx: parking_lot::Mutex::new(Some(mic_rx)),
            chime,
            child: parking_lot::Mutex::new(Some(child)),
        })
    }

    fn signal(&self, signal: i32) {
        // helper contract: SIGUSR1 clears + discards, SIGUSR2 resumes
        unsafe {
            libc::kill(self.pid, signal);
        }
    }
}

#[async_trait]
impl AudioTransport for HelperTransport {
    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<f32>>, CoreError> {
        self.mic_rx
            .lock()
            .take()
            .ok_or_else(|| CoreError::Transport("mic stream already taken".to_string()))
    }

    async fn write_speaker(&self, pcm: &[u8]) -> Result<(), CoreError> {
        if self.discard.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut stdin = self.stdin.lock().await;
        match stdin.write_all(pcm).await {
            Ok(()) => Ok(()),
            Err(_) if self.discard.load(Ordering::SeqCst) => Ok(()),
            Err(e) => Err(CoreError::Transport(format!("speaker write failed: {}", e))),
        }
    }

    async fn interrupt(&self) {
        self.discard.store(true, Ordering::SeqCst);
        self.signal(libc::SIGUSR1);
    }

    async fn resume(&self) {
        self.discard.store(false, Ordering::SeqCst);
        self.signal(libc::SIGUSR2);
    }

    async fn play_chime(&self) -> Result<(), CoreError> {
        let chime = self.chime.clone();
        self.write_speaker(&chime).await
    }

    async fn close(&self) {
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}
