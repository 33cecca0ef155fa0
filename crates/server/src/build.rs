//! Session assembly
//!
//! Wires settings into a full component set: VAD, STT, endpointer, the
//! agent backend, and the TTS player over the given transport. Missing
//! model files and unspawnable backends fail here, before the session
//! loop starts.

use anyhow::Context;
use std::sync::Arc;

use voiceloop_agent::{AgentSession, AgentSessionConfig};
use voiceloop_config::{Settings, TransportKind};
use voiceloop_core::{AudioTransport, SpeechRecognizer, SynthesisBackend};
use voiceloop_pipeline::{
    EndpointConfig, Endpointer, HttpSynth, HttpSynthConfig, SttConfig, SttProcessor,
    SubprocessSynth, SubprocessSynthConfig, TtsPlayer, VadConfig, VadProcessor,
};
use voiceloop_session::{ControllerConfig, VoiceSession};

/// VAD frames per the configured silence window (32 ms per frame).
fn silence_frames(silence_threshold_ms: u64) -> usize {
    ((silence_threshold_ms / 32) as usize).max(1)
}


/// Build a voice session over an already-constructed transport.
pub async fn build_session(
    settings: &Settings,
    transport: Arc<dyn AudioTransport>,
    kind: TransportKind,
    greeting_pcm: Option<Arc<Vec<u8>>>,
) -> anyhow::Result<VoiceSession> {
    // the VAD model may live at its configured path or in the shared
    // model cache populated at warm-up
    let vad_model_path = if settings.models.vad_model_path.exists() {
        settings.models.vad_model_path.clone()
    } else {
        settings.models.model_cache_dir.join("silero_vad.onnx")
    };

    let vad_config = VadConfig {
        // the redemption window is the configured end-of-speech silence
        min_silence_frames: silence_frames(settings.endpointing.silence_threshold_ms),
        ..VadConfig::default()
    };
    let vad = Arc::new(VadProcessor::from_model_path(&vad_model_path, vad_config));

    let stt = Arc::new(
        SttProcessor::new(SttConfig::new(&settings.models.stt_model_path))
            .context("speech recognizer unavailable")?,
    );

    let endpointer = Arc::new(Endpointer::new(EndpointConfig {
        min_word_count_for_fast_path: settings.endpointing.min_word_count_for_fast_path,
        enable_semantic_fallback: settings.endpointing.enable_semantic_fallback,
        max_silence_before_timeout_ms: settings.endpointing.max_silence_before_timeout_ms,
    }));

    let agent = Arc::new(
        AgentSession::spawn(AgentSessionConfig::from(&settings.claude_session))
            .context("agent backend unavailable")?,
    );

    let backend: Arc<dyn SynthesisBackend> = match &settings.tts.endpoint {
        Some(endpoint) => Arc::new(
            HttpSynth::new(HttpSynthConfig::new(
                endpoint,
                &settings.tts.tts_model,
                &settings.tts.tts_voice,
            ))
            .context("HTTP synthesizer unavailable")?,
        ),
        None => Arc::new(
            SubprocessSynth::spawn(SubprocessSynthConfig::new(
                &settings.tts.command,
                &settings.tts.tts_model,
                &settings.tts.tts_voice,
            ))
            .await
            .context("synthesizer helper unavailable")?,
        ),
    };

    let player = Arc::new(TtsPlayer::new(backend, transport.clone()));

    let mut config = ControllerConfig::from_settings(settings, kind);
    config.greeting_pcm = greeting_pcm;

    Ok(VoiceSession::new(
        config,
        transport,
        vad,
        stt as Arc<dyn SpeechRecognizer>,
        endpointer,
        agent,
        player,
    ))
}
