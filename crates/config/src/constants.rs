//! Centralized constants
//!
//! Numbers shared across crates live here so pipeline defaults and
//! settings defaults cannot drift apart.

/// Audio constants
pub mod audio {
    /// Analysis rate for VAD and STT
    pub const ANALYSIS_SAMPLE_RATE: u32 = 16_000;
    /// Synthesis rate for TTS output
    pub const SYNTHESIS_SAMPLE_RATE: u32 = 24_000;
    /// Telephony wire rate
    pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;
    /// VAD frame size in samples (32 ms at 16 kHz)
    pub const VAD_FRAME_SAMPLES: usize = 512;
}

/// Session constants
pub mod session {
    /// Lock-file directory under the user's home
    pub const LOCK_DIR_NAME: &str = ".claude-voice-sessions";
    /// Default phrase that ends the session when heard
    pub const DEFAULT_STOP_PHRASE: &str = "stop listening";
    /// Sustained-speech window before barging in, local device
    pub const LOCAL_INTERRUPTION_THRESHOLD_MS: u64 = 800;
    /// Sustained-speech window before barging in, browser transport
    pub const BROWSER_INTERRUPTION_THRESHOLD_MS: u64 = 1_500;
    /// Sustained-speech window before barging in, telephony transport
    pub const TELEPHONY_INTERRUPTION_THRESHOLD_MS: u64 = 2_000;
}

/// Endpointing constants
pub mod endpointing {
    /// VAD silence window treated as end of speech
    pub const DEFAULT_SILENCE_THRESHOLD_MS: u64 = 700;
    /// Deadline for the semantic fallback classifier
    pub const DEFAULT_MAX_SILENCE_BEFORE_TIMEOUT_MS: u64 = 2_000;
    /// Word count at or above which a turn is complete without semantics
    pub const DEFAULT_MIN_WORD_COUNT_FAST_PATH: usize = 3;
}

/// Narration constants
pub mod narration {
    /// Interval between "still working" summaries during tool calls
    pub const DEFAULT_SUMMARY_INTERVAL_MS: u64 = 2_500;
}

/// Server constants
pub mod server {
    /// WebSocket keepalive ping interval
    pub const PING_INTERVAL_SECS: u64 = 30;
    /// Deadline for the first inbound mic chunk
    pub const FIRST_CHUNK_TIMEOUT_SECS: u64 = 15;
}
