//! Telephony WebSocket surface
//!
//! Upgrade at `/media/<callToken>`, where the call token is a one-time
//! UUID issued by a prior signed webhook. Text frames carry JSON
//! envelopes: `connected`, `start` (streamSid), `media` (base64 μ-law
//! 8 kHz), `stop`. Outbound media envelopes carry base64 μ-law in 20 ms
//! chunks; a `clear` envelope flushes the far-end playback buffer.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

use voiceloop_config::TransportKind;
use voiceloop_core::AudioTransport;
use voiceloop_session::SessionEvent;
use voiceloop_transport::{load_chime, OutboundFrame, WireFormat, WsTransport};

use crate::build::build_session;
use crate::state::AppState;

/// μ-law bytes per outbound media envelope: 20 ms at 8 kHz
const MEDIA_CHUNK_BYTES: usize = 160;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum Envelope {
    Connected,
    Start { start: StartInfo },
    Media { media: MediaPayload },
    Stop,
}

#[derive(Debug, Deserialize)]
struct StartInfo {
    #[serde(rename = "streamSid")]
    stream_sid: String,
    #[serde(rename = "callSid", default)]
    call_sid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    payload: String,
}

/// Handle the `/media/:call_token` upgrade.
pub async fn handle(
    ws: WebSocketUpgrade,
    Path(call_token): Path<String>,
    State(state): State<AppState>,
) -> Response {
    // one-time token: consumed at upgrade
    if state.pending_calls.remove(&call_token).is_none() {
        tracing::warn!("rejected /media: unknown or reused call token");
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let chime = match load_chime(&state.settings.session.chime_wav) {
        Ok(chime) => chime,
        Err(e) => {
            tracing::error!("chime unavailable: {}", e);
            return;
        },
    };

    let (transport, mut out_rx) = WsTransport::new(WireFormat::TelephonyUlaw, chime);

    let session = match build_session(
        &state.settings,
        transport.clone() as Arc<dyn AudioTransport>,
        TransportKind::Telephony,
        None,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("failed to build telephony session: {:#}", e);
            return;
        },
    };

    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));

    let run_session = session.clone();
    let session_task = tokio::spawn(async move { run_session.run().await });

    // egress waits for the stream sid from the start envelope
    let (sid_tx, sid_rx) = tokio::sync::oneshot::channel::<String>();
    let egress_sender = sender.clone();
    let egress_task = tokio::spawn(async move {
        let Ok(stream_sid) = sid_rx.await else { return };
        while let Some(frame) = out_rx.recv().await {
            let messages: Vec<String> = match frame {
                OutboundFrame::Audio(ulaw) => ulaw
                    .chunks(MEDIA_CHUNK_BYTES)
                    .map(|chunk| {
                        json!({
                            "event": "media",
                            "streamSid": stream_sid,
                            "media": {"payload": BASE64.encode(chunk)},
                        })
                        .to_string()
                    })
                    .collect(),
                OutboundFrame::Clear => {
                    vec![json!({"event": "clear", "streamSid": stream_sid}).to_string()]
                },
            };

            for message in messages {
                if egress_sender
                    .lock()
                    .await
                    .send(Message::Text(message))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    });

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

    let mut sid_tx = Some(sid_tx);
    while let Some(message) = receiver.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!("unparseable media envelope: {}", e);
                continue;
            },
        };

        match envelope {
            Envelope::Connected => {},
            Envelope::Start { start } => {
                tracing::info!(
                    stream_sid = %start.stream_sid,
                    call_sid = ?start.call_sid,
                    "telephony stream started"
                );
                if let Some(tx) = sid_tx.take() {
                    let _ = tx.send(start.stream_sid);
                }
            },
            Envelope::Media { media } => match BASE64.decode(&media.payload) {
                Ok(ulaw) => {
                    if transport.push_mic_payload(&ulaw).await.is_err() {
                        break;
                    }
                },
                Err(e) => tracing::debug!("bad media payload: {}", e),
            },
            Envelope::Stop => break,
        }
    }

    session.stop().await;
    egress_task.abort();
    event_task.abort();
    let _ = session_task.await;
    tracing::info!("telephony connection closed");
}
