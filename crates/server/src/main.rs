//! voiceloop entry point
//!
//! `voiceloop serve` runs the WebSocket server; `voiceloop local` (or no
//! argument on a machine with audio devices) runs one local voice
//! session against the device transport and exits when the stop phrase
//! is heard.

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voiceloop_config::{load_settings, Settings, TransportKind};
use voiceloop_core::AudioTransport;
use voiceloop_server::{build_session, create_router, AppState};
use voiceloop_session::{default_lock_dir, SessionEvent, SessionLock};
use voiceloop_transport::{
    load_prompt, HelperTransport, HelperTransportConfig, PulseTransport, PulseTransportConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("VOICELOOP_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // tracing not yet initialized
            eprintln!("warning: failed to load config: {}. Using defaults.", e);
            Settings::default()
        },
    };

    init_tracing(&settings);
    tracing::info!("starting voiceloop v{}", env!("CARGO_PKG_VERSION"));

    match std::env::args().nth(1).as_deref() {
        Some("local") => run_local(settings).await,
        Some("serve") | None => serve(settings).await,
        Some(other) => anyhow::bail!("unknown mode '{}': expected 'serve' or 'local'", other),
    }
}

/// Run the WebSocket server.
async fn serve(settings: Settings) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let state = AppState::new(settings);

    // device tokens are provisioned out of band
    if let Ok(tokens) = std::env::var("VOICELOOP_DEVICE_TOKENS") {
        for token in tokens.split(',').filter(|t| !t.trim().is_empty()) {
            state.register_device_token(token.trim());
        }
        tracing::info!(count = state.device_tokens.len(), "device tokens loaded");
    }

    let app = create_router(state);
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Run one local voice session to completion.
async fn run_local(settings: Settings) -> anyhow::Result<()> {
    let mut lock = SessionLock::acquire(
        &default_lock_dir(),
        settings.session.max_concurrent_sessions,
    )?;

    let transport = local_transport(&settings).await?;

    let greeting = match &settings.session.greeting_wav {
        Some(path) => Some(load_prompt(path)?),
        None => None,
    };

    let session = build_session(&settings, transport, TransportKind::Local, greeting).await?;
    let mut events = session.subscribe();

    let runner = session.clone();
    let run = tokio::spawn(async move { runner.run().await });

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Stopped) | Err(_) => break,
                Ok(SessionEvent::FinalTranscript(text)) => {
                    tracing::info!(%text, "heard");
                },
                Ok(_) => {},
            },
            _ = shutdown_signal() => {
                tracing::info!("shutdown requested");
                session.stop().await;
                break;
            },
        }
    }

    let _ = run.await;
    lock.release();
    Ok(())
}

/// Pick the local transport for this platform.
async fn local_transport(settings: &Settings) -> anyhow::Result<Arc<dyn AudioTransport>> {
    let chime = settings.session.chime_wav.clone();

    // an explicit helper binary takes precedence on any platform
    if let Ok(binary) = std::env::var("VOICELOOP_AUDIO_HELPER") {
        let transport =
            HelperTransport::start(HelperTransportConfig::new(binary, chime)).await?;
        return Ok(Arc::new(transport));
    }

    if cfg!(target_os = "macos") {
        let transport = HelperTransport::start(HelperTransportConfig::new(
            "voiceloop-audio-helper",
            chime,
        ))
        .await?;
        Ok(Arc::new(transport))
    } else {
        let transport = PulseTransport::start(PulseTransportConfig::new(chime)).await?;
        Ok(Arc::new(transport))
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}

/// Initialize tracing from settings, honoring `RUST_LOG` when set.
fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("voiceloop={},tower_http=info", settings.observability.log_level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
