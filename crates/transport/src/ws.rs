//! WebSocket transport
//!
//! Channel-backed adapter for a connected browser or telephony peer. The
//! server's socket tasks feed decoded inbound payloads in through
//! [`WsTransport::push_mic_payload`] and drain [`OutboundFrame`]s to the
//! wire; this type owns all format conversion so both surfaces share one
//! session pipeline.
//!
//! Wire formats:
//! - `BrowserFloat32` — inbound binary frames are raw f32 LE mic PCM at
//!   the browser's chosen rate, resampled here to 16 kHz; outbound audio
//!   stays raw 24 kHz i16 LE.
//! - `TelephonyUlaw` — inbound payloads are μ-law 8 kHz (already
//!   base64-decoded by the server), upsampled to 16 kHz; outbound audio
//!   is downsampled to 8 kHz and μ-law encoded.
//!
//! Interrupt emits a `Clear` frame (the far end flushes its buffer);
//! resume is a no-op. Writes after the wire closes are absorbed.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use voiceloop_core::{
    downsample_24k_8k, pcm16_to_f32, resample, upsample_8k_16k, AudioTransport, CoreError,
};
use voiceloop_core::codec::{ulaw_decode_buf, ulaw_encode_buf};
use voiceloop_config::constants::audio::ANALYSIS_SAMPLE_RATE;

/// Remote wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Raw f32 LE frames at the browser's sample rate
    BrowserFloat32 { sample_rate: u32 },
    /// Base64 μ-law 8 kHz payloads inside JSON envelopes
    TelephonyUlaw,
}

/// Frames the server forwards to the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Wire-format audio bytes (browser: 24 kHz i16 LE; telephony:
    /// μ-law 8 kHz, pre-base64)
    Audio(Vec<u8>),
    /// Tell the far end to flush its playback buffer
    Clear,
}

/// Channel-backed WebSocket adapter
pub struct WsTransport {
    format: WireFormat,
    mic_tx: mpsc::Sender<Vec<f32>>,
    mic_rx: parking_lot::Mutex<Option<mpsc::Receiver<Vec<f32>>>>,
    out_tx: mpsc::Sender<OutboundFrame>,
    closed: AtomicBool,
    chime: Arc<Vec<u8>>,
}

impl WsTransport {
    /// Returns the transport plus the outbound frame stream the server's
    /// egress task drains.
    pub fn new(format: WireFormat, chime: Arc<Vec<u8>>) -> (Arc<Self>, mpsc::Receiver<OutboundFrame>) {
        let (mic_tx, mic_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::channel(256);

        let transport = Arc::new(Self {
            format,
            mic_tx,
            mic_rx: parking_lot::Mutex::new(Some(mic_rx)),
            out_tx,
            closed: AtomicBool::new(false),
            chime,
        });
        (transport, out_rx)
    }

    /// Feed one decoded inbound payload from the socket task. Converts
    /// to 16 kHz f32 and queues it for the session's mic pump.
    pub async fn push_mic_payload(&self, payload: &[u8]) -> Result<(), CoreError> {
        let samples = match self.format {
            WireFormat::BrowserFloat32 { sample_rate } => {
                let raw: Vec<f32> = payload
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                resample(&raw, sample_rate, ANALYSIS_SAMPLE_RATE)?
            },
            WireFormat::TelephonyUlaw => {
                let narrow: Vec<f32> = ulaw_decode_buf(payload)
                    .iter()
                    .map(|&s| s as f32 / 32768.0)
                    .collect();
                upsample_8k_16k(&narrow)
            },
        };

        if samples.is_empty() {
            return Ok(());
        }
        self.mic_tx
            .send(samples)
            .await
            .map_err(|_| CoreError::ChannelClosed)
    }

    /// Whether the session side has closed the transport.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn send_frame(&self, frame: OutboundFrame) {
        if self.is_closed() {
            return;
        }
        // a closed wire is absorbed silently
        if self.out_tx.send(frame).await.is_err() {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl AudioTransport for WsTransport {
    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<f32>>, CoreError> {
        self.mic_rx
            .lock()
            .take()
            .ok_or_else(|| CoreError::Transport("mic stream already taken".to_string()))
    }

    async fn write_speaker(&self, pcm: &[u8]) -> Result<(), CoreError> {
        let frame = match self.format {
            WireFormat::BrowserFloat32 { .. } => OutboundFrame::Audio(pcm.to_vec()),
            WireFormat::TelephonyUlaw => {
                let samples = pcm16_to_f32(pcm);
                let narrow = downsample_24k_8k(&samples);
                let pcm8: Vec<i16> = narrow
                    .iter()
                    .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                    .collect();
                OutboundFrame::Audio(ulaw_encode_buf(&pcm8))
            },
        };
        self.send_frame(frame).await;
        Ok(())
    }

    async fn interrupt(&self) {
        self.send_frame(OutboundFrame::Clear).await;
    }

    async fn resume(&self) {
        // the far end resumes on its own after a clear
    }

    async fn play_chime(&self) -> Result<(), CoreError> {
        let chime = self.chime.clone();
        self.write_speaker(&chime).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
