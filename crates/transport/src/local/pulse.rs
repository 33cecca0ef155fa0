//! PulseAudio transport
//!
//! Capture and playback run as separate helper processes bound to named
//! echo-cancelling virtual devices:
//!
//! - capture: `parec --device=<source> --format=s16le --rate=16000
//!   --channels=1 --raw`
//! - playback: `pacat --device=<sink> --format=s16le --rate=24000
//!   --channels=1 --raw --playback`
//!
//! Interrupt kills the playback helper (dropping whatever it had
//! buffered) and resume respawns it. Writes route through a stable
//! gated sink that swaps its downstream stdin on respawn, discards
//! writes while interrupted, and swallows errors originating from the
//! killed helper while in discard mode. A playback helper that dies
//! outside an interrupt is respawned once.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};

use voiceloop_core::{pcm16_to_f32, AudioTransport, CoreError};

use crate::chime::load_chime;
use crate::TransportError;

/// Stdout read size: 100 ms of 16 kHz i16 mono
const MIC_READ_BYTES: usize = 3200;

/// PulseAudio transport configuration
#[derive(Debug, Clone)]
pub struct PulseTransportConfig {
    /// Echo-cancel capture source name
    pub source: String,
    /// Echo-cancel playback sink name
    pub sink: String,
    /// Mic capture rate
    pub mic_rate: u32,
    /// Speaker playback rate
    pub speaker_rate: u32,
    /// Chime WAV decoded at init
    pub chime_path: PathBuf,
}

impl PulseTransportConfig {
    pub fn new(chime_path: impl Into<PathBuf>) -> Self {
        Self {
            source: "echocancel_source".to_string(),
            sink: "echocancel_sink".to_string(),
            mic_rate: 16_000,
            speaker_rate: 24_000,
            chime_path: chime_path.into(),
        }
    }
}

/// Stable forwarding sink in front of the pacat helper.
///
/// The downstream stdin is swapped atomically when the helper respawns;
/// writes are silently dropped while in discard mode, and errors from a
/// killed downstream are swallowed while discarding.
struct GatedSink {
    stdin: Mutex<Option<ChildStdin>>,
    discard: AtomicBool,
}

impl GatedSink {
    fn new(stdin: ChildStdin) -> Self {
        Self {
            stdin: Mutex::new(Some(stdin)),
            discard: AtomicBool::new(false),
        }
    }

    fn set_discard(&self, discard: bool) {
        self.discard.store(discard, Ordering::SeqCst);
    }

    fn is_discarding(&self) -> bool {
        self.discard.load(Ordering::SeqCst)
    }

    async fn swap(&self, stdin: Option<ChildStdin>) {
        *self.stdin.lock().await = stdin;
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), CoreError> {
        if self.is_discarding() {
            return Ok(());
        }

        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            // between kill and respawn
            return Ok(());
        };

        match stdin.write_all(bytes).await {
            Ok(()) => Ok(()),
            Err(_) if self.is_discarding() => Ok(()),
            Err(e) => Err(CoreError::Transport(format!("pacat write failed: {}", e))),
        }
    }
}

/// Transport over PulseAudio echo-cancel devices
pub struct PulseTransport {
    config: PulseTransportConfig,
    sink: Arc<GatedSink>,
    capture_child: parking_lot::Mutex<Option<Child>>,
    playback_child: Mutex<Option<Child>>,
    mic_rx: parking_lot::Mutex<Option<mpsc::Receiver<Vec<f32>>>>,
    /// One free respawn for a playback helper that dies outside interrupt
    respawned_once: AtomicBool,
    chime: Arc<Vec<u8>>,
}

impl PulseTransport {
    /// Check devices, spawn both helpers, and start the mic pump.
    pub async fn start(config: PulseTransportConfig) -> Result<Self, TransportError> {
        let chime = load_chime(&config.chime_path)?;

        check_device("sources", &config.source).await?;
        check_device("sinks", &config.sink).await?;

        // capture helper
        let mut capture = Command::new("parec")
            .arg(format!("--device={}", config.source))
            .arg("--format=s16le")
            .arg(format!("--rate={}", config.mic_rate))
            .arg("--channels=1")
            .arg("--raw")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Precondition(format!("cannot start parec: {}", e)))?;

        let mut stdout = capture
            .stdout
            .take()
            .ok_or_else(|| TransportError::Helper("parec stdout unavailable".to_string()))?;

        // mic pump: a capture-helper exit is fatal and surfaces as the
        // channel closing
        let (mic_tx, mic_rx) = mpsc::channel::<Vec<f32>>(64);
        tokio::spawn(async move {
            let mut buf = vec![0u8; MIC_READ_BYTES];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => {
                        tracing::error!("parec capture stream ended");
                        break;
                    },
                    Ok(n) => {
                        if mic_tx.send(pcm16_to_f32(&buf[..n])).await.is_err() {
                            break;
                        }
                    },
                    Err(e) => {
                        tracing::error!("parec read failed: {}", e);
                        break;
                    },
                }
            }
        });

        // playback helper
        let (playback, stdin) = spawn_pacat(&config)?;

        tracing::info!(
            source = %config.source,
            sink = %config.sink,
            "PulseAudio transport ready"
        );

        Ok(Self {
            sink: Arc::new(GatedSink::new(stdin)),
            capture_child: parking_lot::Mutex::new(Some(capture)),
            playback_child: Mutex::new(Some(playback)),
            mic_rx: parking_lot::Mutex::new(Some(mic_rx)),
            respawned_once: AtomicBool::new(false),
            chime,
            config,
        })
    }

    async fn respawn_playback(&self) -> Result<(), CoreError> {
        let (child, stdin) = spawn_pacat(&self.config).map_err(CoreError::from)?;
        self.sink.swap(Some(stdin)).await;
        *self.playback_child.lock().await = Some(child);
        Ok(())
    }
}

fn spawn_pacat(config: &PulseTransportConfig) -> Result<(Child, ChildStdin), TransportError> {
    let mut child = Command::new("pacat")
        .arg(format!("--device={}", config.sink))
        .arg("--format=s16le")
        .arg(format!("--rate={}", config.speaker_rate))
        .arg("--channels=1")
        .arg("--raw")
        .arg("--playback")
        .stdin(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TransportError::Precondition(format!("cannot start pacat: {}", e)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| TransportError::Helper("pacat stdin unavailable".to_string()))?;
    Ok((child, stdin))
}

/// Verify the named echo-cancel device exists before spawning helpers.
async fn check_device(kind: &str, name: &str) -> Result<(), TransportError> {
    let output = Command::new("pactl")
        .args(["list", "short", kind])
        .output()
        .await
        .map_err(|e| TransportError::Precondition(format!("cannot run pactl: {}", e)))?;

    let listing = String::from_utf8_lossy(&output.stdout);
    if !listing.lines().any(|line| line.contains(name)) {
        return Err(TransportError::Precondition(format!(
            "echo-cancel device '{}' not found in {}. Load it with: \
             pactl load-module module-echo-cancel source_name=echocancel_source \
             sink_name=echocancel_sink aec_method=webrtc",
            name, kind
        )));
    }
    Ok(())
}

#[async_trait]
impl AudioTransport for PulseTransport {
    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<f32>>, CoreError> {
        self.mic_rx
            .lock()
            .take()
            .ok_or_else(|| CoreError::Transport("mic stream already taken".to_string()))
    }

    async fn write_speaker(&self, pcm: &[u8]) -> Result<(), CoreError> {
        match self.sink.write(pcm).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // playback helper died outside an interrupt: one respawn
                if !self.respawned_once.swap(true, Ordering::SeqCst) {
                    tracing::warn!("playback helper died ({}), respawning once", e);
                    self.respawn_playback().await?;
                    self.sink.write(pcm).await
                } else {
                    Err(e)
                }
            },
        }
    }

    async fn interrupt(&self) {
        self.sink.set_discard(true);
        self.sink.swap(None).await;
        let child = self.playback_child.lock().await.take();
        if let Some(mut child) = child {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }

    async fn resume(&self) {
        if let Err(e) = self.respawn_playback().await {
            tracing::error!("failed to respawn playback helper: {}", e);
        }
        self.sink.set_discard(false);
    }

    async fn play_chime(&self) -> Result<(), CoreError> {
        let chime = self.chime.clone();
        self.write_speaker(&chime).await
    }

    async fn close(&self) {
        let capture = self.capture_child.lock().take();
        if let Some(mut child) = capture {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        let playback = self.playback_child.lock().await.take();
        if let Some(mut child) = playback {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}
