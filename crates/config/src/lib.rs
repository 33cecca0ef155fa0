//! Configuration for the voiceloop pipeline
//!
//! Settings are layered: `config/default.toml`, then `config/{env}.toml`,
//! then environment variables prefixed `VOICELOOP_`. Defaults live in code
//! so a missing config directory still produces a working local session.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, AgentSettings, EndpointingSettings, ModelPaths, NarrationSettings,
    ObservabilitySettings, ServerSettings, SessionSettings, Settings, TransportKind, TtsSettings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Validation(String),
}
