//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::{endpointing, narration, server, session};
use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Model file locations
    #[serde(default)]
    pub models: ModelPaths,

    /// Synthesizer selection
    #[serde(default)]
    pub tts: TtsSettings,

    /// Session behavior
    #[serde(default)]
    pub session: SessionSettings,

    /// Turn endpointing
    #[serde(default)]
    pub endpointing: EndpointingSettings,

    /// Tool-call narration
    #[serde(default)]
    pub narration: NarrationSettings,

    /// Agent backend
    #[serde(default)]
    pub claude_session: AgentSettings,

    /// WebSocket server
    #[serde(default)]
    pub server: ServerSettings,

    /// Logging
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

/// Model file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPaths {
    /// Directory holding the offline recognizer triple
    /// (encoder.onnx, decoder.onnx, tokens.txt)
    #[serde(default = "default_stt_model_path")]
    pub stt_model_path: PathBuf,

    /// Optional VAD model; energy-based detection is used when absent
    #[serde(default = "default_vad_model_path")]
    pub vad_model_path: PathBuf,

    /// Read/write directory for downloaded model artifacts
    #[serde(default = "default_model_cache_dir")]
    pub model_cache_dir: PathBuf,
}

fn default_stt_model_path() -> PathBuf {
    PathBuf::from("models/stt")
}

fn default_vad_model_path() -> PathBuf {
    PathBuf::from("models/vad/silero_vad.onnx")
}

fn default_model_cache_dir() -> PathBuf {
    PathBuf::from("models/cache")
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            stt_model_path: default_stt_model_path(),
            vad_model_path: default_vad_model_path(),
            model_cache_dir: default_model_cache_dir(),
        }
    }
}

/// Synthesizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSettings {
    /// Synthesizer model identifier
    #[serde(default = "default_tts_model")]
    pub tts_model: String,

    /// Voice identifier
    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,

    /// Command for the synthesizer helper process
    #[serde(default = "default_tts_command")]
    pub command: String,

    /// Streaming HTTP endpoint; when set it is used instead of the helper
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_tts_model() -> String {
    "kokoro".to_string()
}

fn default_tts_voice() -> String {
    "af_heart".to_string()
}

fn default_tts_command() -> String {
    "voiceloop-tts-helper".to_string()
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            tts_model: default_tts_model(),
            tts_voice: default_tts_voice(),
            command: default_tts_command(),
            endpoint: None,
        }
    }
}

/// Session behavior settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Case-insensitive substring that ends the session when heard
    #[serde(default = "default_stop_phrase")]
    pub stop_phrase: String,

    /// Sustained-speech window before barging in (local device)
    #[serde(default = "default_interruption_threshold_ms")]
    pub interruption_threshold_ms: u64,

    /// Cross-process cap on live sessions
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,

    /// Optional greeting WAV written through the speaker after init
    #[serde(default)]
    pub greeting_wav: Option<PathBuf>,

    /// Ready-chime WAV decoded and cached at adapter init
    #[serde(default = "default_chime_wav")]
    pub chime_wav: PathBuf,
}

fn default_stop_phrase() -> String {
    session::DEFAULT_STOP_PHRASE.to_string()
}

fn default_interruption_threshold_ms() -> u64 {
    session::LOCAL_INTERRUPTION_THRESHOLD_MS
}

fn default_max_concurrent_sessions() -> usize {
    2
}

fn default_chime_wav() -> PathBuf {
    PathBuf::from("assets/chime.wav")
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            stop_phrase: default_stop_phrase(),
            interruption_threshold_ms: default_interruption_threshold_ms(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            greeting_wav: None,
            chime_wav: default_chime_wav(),
        }
    }
}

impl SessionSettings {
    /// Interruption threshold for a given transport kind. Remote listeners
    /// hear themselves with more latency, so remote surfaces get a longer
    /// window before barging in.
    pub fn interruption_threshold_for(&self, transport: TransportKind) -> u64 {
        match transport {
            TransportKind::Local => self.interruption_threshold_ms,
            TransportKind::Browser => session::BROWSER_INTERRUPTION_THRESHOLD_MS,
            TransportKind::Telephony => session::TELEPHONY_INTERRUPTION_THRESHOLD_MS,
        }
    }
}

/// Which transport surface a session runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Local,
    Browser,
    Telephony,
}

/// Turn endpointing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointingSettings {
    /// VAD silence window treated as end of speech
    #[serde(default = "default_silence_threshold_ms")]
    pub silence_threshold_ms: u64,

    /// Deadline for the semantic fallback before completion is forced
    #[serde(default = "default_max_silence_before_timeout_ms")]
    pub max_silence_before_timeout_ms: u64,

    /// Word count at or above which the fast path completes the turn
    #[serde(default = "default_min_word_count")]
    pub min_word_count_for_fast_path: usize,

    /// Consult the semantic classifier for short transcripts
    #[serde(default)]
    pub enable_semantic_fallback: bool,
}

fn default_silence_threshold_ms() -> u64 {
    endpointing::DEFAULT_SILENCE_THRESHOLD_MS
}

fn default_max_silence_before_timeout_ms() -> u64 {
    endpointing::DEFAULT_MAX_SILENCE_BEFORE_TIMEOUT_MS
}

fn default_min_word_count() -> usize {
    endpointing::DEFAULT_MIN_WORD_COUNT_FAST_PATH
}

impl Default for EndpointingSettings {
    fn default() -> Self {
        Self {
            silence_threshold_ms: default_silence_threshold_ms(),
            max_silence_before_timeout_ms: default_max_silence_before_timeout_ms(),
            min_word_count_for_fast_path: default_min_word_count(),
            enable_semantic_fallback: false,
        }
    }
}

/// Tool-call narration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationSettings {
    /// Interval between "still working" summaries during tool calls
    #[serde(default = "default_summary_interval_ms")]
    pub summary_interval_ms: u64,
}

fn default_summary_interval_ms() -> u64 {
    narration::DEFAULT_SUMMARY_INTERVAL_MS
}

impl Default for NarrationSettings {
    fn default() -> Self {
        Self {
            summary_interval_ms: default_summary_interval_ms(),
        }
    }
}

/// Agent backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Backend binary spawned once per session
    #[serde(default = "default_agent_binary")]
    pub binary: String,

    /// System prompt injected at spawn
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Permission mode passed through to the backend
    #[serde(default = "default_permission_mode")]
    pub permission_mode: String,

    /// Tools the backend may use
    #[serde(default)]
    pub allowed_tools: Vec<String>,
}

fn default_agent_binary() -> String {
    "claude".to_string()
}

fn default_system_prompt() -> String {
    "You are a voice assistant. Keep replies short and speakable; \
     avoid markdown, code, and lists unless asked to write code."
        .to_string()
}

fn default_permission_mode() -> String {
    "acceptEdits".to_string()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            binary: default_agent_binary(),
            system_prompt: default_system_prompt(),
            permission_mode: default_permission_mode(),
            allowed_tools: Vec::new(),
        }
    }
}

/// WebSocket server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Keepalive ping interval for WebSocket connections
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_ping_interval_secs() -> u64 {
    server::PING_INTERVAL_SECS
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate cross-field consistency. Model-path existence is checked at
    /// component construction, not here, so a server can boot before models
    /// are downloaded into the cache directory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_concurrent_sessions == 0 {
            return Err(ConfigError::Validation(
                "session.max_concurrent_sessions must be at least 1".to_string(),
            ));
        }

        if self.session.stop_phrase.trim().is_empty() {
            return Err(ConfigError::Validation(
                "session.stop_phrase must not be empty".to_string(),
            ));
        }

        if self.endpointing.min_word_count_for_fast_path == 0 {
            return Err(ConfigError::Validation(
                "endpointing.min_word_count_for_fast_path must be at least 1".to_string(),
            ));
        }

        if self.narration.summary_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "narration.summary_interval_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Load settings with file/environment layering.
///
/// Priority: env vars > `config/{env}.toml` > `config/default.toml` > code
/// defaults. Missing files are not errors.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder().add_source(File::with_name("config/default").required(false));

    if let Some(env) = env {
        builder = builder.add_source(File::with_name(&format!("config/{}", env)).required(false));
    }

    let config = builder
        .add_source(Environment::with_prefix("VOICELOOP").separator("__"))
        .build()?;

    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}
