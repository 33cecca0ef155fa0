//! Shared server state

use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use voiceloop_config::Settings;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// Issued device tokens accepted on `/audio`
    pub device_tokens: Arc<DashMap<String, ()>>,
    /// Tokens with a live connection; duplicates are rejected
    pub active_tokens: Arc<DashMap<String, ()>>,
    /// One-time call tokens for `/media/:call_token`
    pub pending_calls: Arc<DashMap<String, ()>>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
            device_tokens: Arc::new(DashMap::new()),
            active_tokens: Arc::new(DashMap::new()),
            pending_calls: Arc::new(DashMap::new()),
        }
    }

    /// Register a device token (provisioned out of band).
    pub fn register_device_token(&self, token: impl Into<String>) {
        self.device_tokens.insert(token.into(), ());
    }

    /// Issue a one-time call token for an inbound call. The telephony
    /// handler consumes it at upgrade time.
    pub fn issue_call_token(&self) -> String {
        let token = Uuid::new_v4().to_string();
        self.pending_calls.insert(token.clone(), ());
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_token_is_single_use() {
        let state = AppState::new(Settings::default());
        let token = state.issue_call_token();

        assert!(state.pending_calls.remove(&token).is_some());
        assert!(state.pending_calls.remove(&token).is_none());
    }

    #[test]
    fn test_device_token_registration() {
        let state = AppState::new(Settings::default());
        state.register_device_token("tok-1");
        assert!(state.device_tokens.contains_key("tok-1"));
        assert!(!state.device_tokens.contains_key("tok-2"));
    }
}
