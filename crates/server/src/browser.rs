//! Browser WebSocket surface
//!
//! Upgrade at `/audio?token=<deviceToken>&sample_rate=<hz>`. Loopback
//! connections bypass the token check; everyone else must present an
//! issued device token, and a token may hold only one connection at a
//! time. Inbound binary frames are raw f32 LE mic PCM at the browser's
//! chosen rate; outbound binary frames are 24 kHz i16 LE PCM. The
//! server pings every ~30 s so intermediaries keep the connection open.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use voiceloop_config::TransportKind;
use voiceloop_core::AudioTransport;
use voiceloop_session::SessionEvent;
use voiceloop_transport::{load_chime, OutboundFrame, WireFormat, WsTransport};

use crate::state::AppState;
use crate::build::build_session;

#[derive(Debug, Deserialize)]
pub struct AudioQuery {
    token: Option<String>,
    sample_rate: Option<u32>,
}

/// Handle the `/audio` upgrade.
pub async fn handle(
    ws: WebSocketUpgrade,
    Query(query): Query<AudioQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let loopback = addr.ip().is_loopback();

    if !loopback {
        match &query.token {
            Some(token) if state.device_tokens.contains_key(token) => {},
            _ => {
                tracing::warn!(%addr, "rejected /audio: missing or unknown device token");
                return StatusCode::UNAUTHORIZED.into_response();
            },
        }
    }

    // one live connection per token
    if let Some(token) = &query.token {
        if state.active_tokens.insert(token.clone(), ()).is_some() {
            tracing::warn!("rejected /audio: token already connected");
            return StatusCode::CONFLICT.into_response();
        }
    }

    let token = query.token.clone();
    let sample_rate = query.sample_rate.unwrap_or(48_000);
    ws.on_upgrade(move |socket| async move {
        handle_socket(socket, state.clone(), sample_rate).await;
        if let Some(token) = token {
            state.active_tokens.remove(&token);
        }
    })
}

async fn handle_socket(socket: WebSocket, state: AppState, sample_rate: u32) {
    let chime = match load_chime(&state.settings.session.chime_wav) {
        Ok(chime) => chime,
        Err(e) => {
            tracing::error!("chime unavailable: {}", e);
            return;
        },
    };

    let (transport, mut out_rx) =
        WsTransport::new(WireFormat::BrowserFloat32 { sample_rate }, chime);

    let session = match build_session(
        &state.settings,
        transport.clone() as Arc<dyn AudioTransport>,
        TransportKind::Browser,
        None,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("failed to build browser session: {:#}", e);
            return;
        },
    };

    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));

    // session loop
    let run_session = session.clone();
    let session_task = tokio::spawn(async move { run_session.run().await });

    // keepalive pings through intermediaries
    let ping_sender = sender.clone();
    let ping_interval = Duration::from_secs(state.settings.server.ping_interval_secs);
    let ping_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if ping_sender
                .lock()
                .await
                .send(Message::Ping(Vec::new()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // egress: transport frames → wire
    let egress_sender = sender.clone();
    let egress_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let message = match frame {
                OutboundFrame::Audio(pcm) => Message::Binary(pcm),
                OutboundFrame::Clear => Message::Text(r#"{"type":"clear"}"#.to_string()),
            };
            if egress_sender.lock().await.send(message).await.is_err() {
                break;
            }
        }
    });

    // mirror session end onto the socket
    let mut events = session.subscribe();
    let close_sender = sender.clone();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if matches!(event, SessionEvent::Stopped) {
                let _ = close_sender.lock().await.send(Message::Close(None)).await;
                break;
            }
        }
    });

    // ingress: mic frames off the wire, with a deadline on the first one
    let first_chunk_deadline = Duration::from_secs(
        voiceloop_config::constants::server::FIRST_CHUNK_TIMEOUT_SECS,
    );
    let mut first = true;
    loop {
        let next = if first {
            match tokio::time::timeout(first_chunk_deadline, receiver.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::warn!("no mic audio within the startup deadline, closing");
                    break;
                },
            }
        } else {
            receiver.next().await
        };

        match next {
            Some(Ok(Message::Binary(payload))) => {
                first = false;
                if transport.push_mic_payload(&payload).await.is_err() {
                    break;
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {},
            Some(Err(e)) => {
                tracing::debug!("websocket error: {}", e);
                break;
            },
        }
    }

    session.stop().await;
    ping_task.abort();
    egress_task.abort();
    event_task.abort();
    let _ = session_task.await;
    tracing::info!("browser connection closed");
}
