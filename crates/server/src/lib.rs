//! WebSocket voice server
//!
//! Two upgrade surfaces share one session pipeline behind the WebSocket
//! adapter's wire formats: `/audio` for browsers (raw float32 frames,
//! device-token auth with a loopback bypass) and `/media/:call_token`
//! for telephony peers (base64 μ-law inside JSON envelopes, one-time
//! call tokens issued by a prior signed webhook).

pub mod browser;
pub mod build;
pub mod state;
pub mod telephony;

pub use build::build_session;
pub use state::AppState;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the server router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/audio", get(browser::handle))
        .route("/media/:call_token", get(telephony::handle))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
