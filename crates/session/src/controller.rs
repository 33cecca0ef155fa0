//! Session controller
//!
//! Owns the seven collaborating components for the life of one voice
//! session and drives the state machine:
//!
//! ```text
//! Idle       init_complete       → Listening
//! Listening  transcript_complete → Processing
//! Processing first_audio         → Speaking
//! Speaking   response_complete   → Listening
//! Processing response_complete   → Listening   (empty response)
//! Speaking   user_interrupt      → Listening
//! Processing user_interrupt      → Listening
//! any        error               → Listening
//! any        stop                → Idle
//! ```
//!
//! Three cooperating tasks run inside the session: the mic pump (this
//! module's `run` loop, feeding VAD and STT inline), a per-turn response
//! task, and the narrator's tool-summary timer. They communicate through
//! flags — the interrupt bail-out, the STT accumulation gate — and the
//! single state variant.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;

use voiceloop_agent::AgentSession;
use voiceloop_config::{Settings, TransportKind};
use voiceloop_core::{
    AgentEvent, AudioTransport, SessionState, SpeechRecognizer, TextChunk, Transcript,
};
use voiceloop_pipeline::{Endpointer, Narrator, TtsPlayer, VadEvent, VadProcessor};

use crate::SessionError;

/// Controller configuration
#[derive(Clone)]
pub struct ControllerConfig {
    /// Case-insensitive substring that ends the session when heard
    pub stop_phrase: String,
    /// Sustained-speech window before barging in
    pub interruption_threshold: Duration,
    /// Interval between tool-call progress summaries
    pub summary_interval: Duration,
    /// Optional greeting PCM (24 kHz i16 LE) written after init
    pub greeting_pcm: Option<Arc<Vec<u8>>>,
    /// Settling delay before the greeting
    pub greeting_settle: Duration,
}

impl ControllerConfig {
    pub fn from_settings(settings: &Settings, transport: TransportKind) -> Self {
        Self {
            stop_phrase: settings.session.stop_phrase.clone(),
            interruption_threshold: Duration::from_millis(
                settings.session.interruption_threshold_for(transport),
            ),
            summary_interval: Duration::from_millis(settings.narration.summary_interval_ms),
            greeting_pcm: None,
            greeting_settle: Duration::from_millis(300),
        }
    }
}

/// Observations a host (server, CLI) can mirror to a UI
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged { old: SessionState, new: SessionState },
    FinalTranscript(String),
    BargeIn,
    ResponseComplete,
    Error(String),
    Stopped,
}

/// One live voice session
#[derive(Clone)]
pub struct VoiceSession {
    inner: Arc<Inner>,
}

struct Inner {
    config: ControllerConfig,
    transport: Arc<dyn AudioTransport>,
    vad: Arc<VadProcessor>,
    stt: Arc<dyn SpeechRecognizer>,
    endpointer: Arc<Endpointer>,
    agent: Arc<AgentSession>,
    player: Arc<TtsPlayer>,

    state: parking_lot::Mutex<SessionState>,
    /// Mic windows are appended to STT while set
    accumulating: AtomicBool,
    /// The current response task's early-exit flag. Each turn gets its
    /// own token so a late-finishing interrupted turn cannot observe the
    /// next turn's freshly-cleared flag.
    bail: parking_lot::Mutex<Arc<AtomicBool>>,
    stopping: AtomicBool,
    stop_notify: Notify,
    /// Transcript held back by an Incomplete endpoint decision
    pending_transcript: parking_lot::Mutex<String>,
    /// Armed interruption timer, if any
    barge_timer: parking_lot::Mutex<Option<JoinHandle<()>>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl VoiceSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ControllerConfig,
        transport: Arc<dyn AudioTransport>,
        vad: Arc<VadProcessor>,
        stt: Arc<dyn SpeechRecognizer>,
        endpointer: Arc<Endpointer>,
        agent: Arc<AgentSession>,
        player: Arc<TtsPlayer>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                vad,
                stt,
                endpointer,
                agent,
                player,
                state: parking_lot::Mutex::new(SessionState::Idle),
                accumulating: AtomicBool::new(false),
                bail: parking_lot::Mutex::new(Arc::new(AtomicBool::new(false))),
                stopping: AtomicBool::new(false),
                stop_notify: Notify::new(),
                pending_transcript: parking_lot::Mutex::new(String::new()),
                barge_timer: parking_lot::Mutex::new(None),
                event_tx,
            }),
        }
    }

    /// Drive the session until the mic stream ends or the stop phrase is
    /// heard. Resolves after cleanup.
    pub async fn run(&self) -> Result<(), SessionError> {
        Inner::run(self.inner.clone()).await
    }

    /// End the session now.
    pub async fn stop(&self) {
        self.inner.stop().await;
    }

    pub fn state(&self) -> SessionState {
        self.inner.current_state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_tx.subscribe()
    }
}

impl Inner {
    async fn run(this: Arc<Self>) -> Result<(), SessionError> {
        let mut mic = this.transport.subscribe().await?;

        // startup greeting, fire-and-forget after a settling delay
        if let Some(greeting) = this.config.greeting_pcm.clone() {
            let transport = this.transport.clone();
            let settle = this.config.greeting_settle;
            tokio::spawn(async move {
                tokio::time::sleep(settle).await;
                if let Err(e) = transport.write_speaker(&greeting).await {
                    tracing::debug!("greeting write failed: {}", e);
                }
            });
        }

        this.set_state(SessionState::Listening);
        if let Err(e) = this.transport.play_chime().await {
            tracing::warn!("chime failed: {}", e);
        }

        loop {
            if this.stopping.load(Ordering::SeqCst) {
                break;
            }

            let window = tokio::select! {
                maybe = mic.recv() => match maybe {
                    Some(window) => window,
                    None => break,
                },
                _ = this.stop_notify.notified() => break,
            };

            // the mic pump never suspends on downstream work: VAD runs
            // inline and the segment buffer takes the window directly
            if this.accumulating.load(Ordering::SeqCst) {
                this.stt.accumulate(window.clone());
            }

            let observations = match this.vad.process(&window) {
                Ok(obs) => obs,
                Err(e) => {
                    tracing::error!("VAD failed: {}", e);
                    let _ = this.event_tx.send(SessionEvent::Error(e.to_string()));
                    continue;
                },
            };

            for obs in observations {
                Self::on_vad_event(&this, obs.event).await;
                if this.stopping.load(Ordering::SeqCst) {
                    break;
                }
            }
        }

        if !this.stopping.load(Ordering::SeqCst) {
            tracing::error!("capture stream ended, stopping session");
        }
        this.stop().await;
        Ok(())
    }

    async fn on_vad_event(this: &Arc<Self>, event: VadEvent) {
        match event {
            VadEvent::SpeechStart => match this.current_state() {
                SessionState::Listening => {
                    this.accumulating.store(true, Ordering::SeqCst);
                },
                SessionState::Speaking | SessionState::Processing => {
                    // capture the would-be interrupting utterance from its
                    // first frame, and arm the barge-in timer
                    this.accumulating.store(true, Ordering::SeqCst);
                    Self::arm_barge_in(this);
                },
                SessionState::Idle => {},
            },

            VadEvent::SpeechContinue => {},

            VadEvent::SpeechEnd => {
                if this.disarm_barge_in() {
                    // false alarm: speech ended before the threshold —
                    // discard the captured audio, playback continues
                    this.stt.clear_buffer();
                    this.accumulating.store(false, Ordering::SeqCst);
                    tracing::debug!("barge-in false alarm discarded");
                    return;
                }

                if this.current_state() == SessionState::Listening
                    && this.accumulating.swap(false, Ordering::SeqCst)
                {
                    Self::finish_user_turn(this).await;
                }
            },

            VadEvent::Silence => {},
        }
    }

    /// Start the interruption countdown unless one is already pending.
    fn arm_barge_in(this: &Arc<Self>) {
        let mut guard = this.barge_timer.lock();
        if guard.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        let session = this.clone();
        let threshold = this.config.interruption_threshold;
        *guard = Some(tokio::spawn(async move {
            tokio::time::sleep(threshold).await;
            session.trigger_interrupt().await;
        }));
    }

    /// Cancel a pending interruption timer. Returns true when the timer
    /// was still pending (the speech was a false alarm).
    fn disarm_barge_in(&self) -> bool {
        let mut guard = self.barge_timer.lock();
        match guard.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            },
            _ => false,
        }
    }

    /// The user kept speaking past the threshold: stop the response
    /// everywhere and hand the floor back.
    async fn trigger_interrupt(&self) {
        tracing::info!("barge-in: interrupting response");
        self.bail.lock().store(true, Ordering::SeqCst);
        self.player.interrupt().await;
        self.agent.interrupt().await;
        // accumulation stays on: the interrupting utterance becomes the
        // next turn
        self.set_state(SessionState::Listening);
        let _ = self.event_tx.send(SessionEvent::BargeIn);
    }

    async fn finish_user_turn(this: &Arc<Self>) {
        let transcript = match this.stt.transcribe().await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("transcription failed: {}", e);
                let _ = this.event_tx.send(SessionEvent::Error(e.to_string()));
                return;
            },
        };

        if transcript.is_empty() {
            return; // silently discarded; the endpointer never sees it
        }

        let combined = {
            let pending = this.pending_transcript.lock();
            if pending.is_empty() {
                transcript.text.clone()
            } else {
                format!("{} {}", *pending, transcript.text)
            }
        };

        tracing::info!(text = %combined, "user turn transcript");
        let _ = this
            .event_tx
            .send(SessionEvent::FinalTranscript(combined.clone()));

        if combined
            .to_lowercase()
            .contains(&this.config.stop_phrase.to_lowercase())
        {
            tracing::info!("stop phrase heard, ending session");
            this.stop().await;
            return;
        }

        let decision = this.endpointer.decide(&Transcript::new(&combined)).await;
        if !decision.is_complete() {
            // hold the words; the user is mid-thought and the next
            // segment continues this turn
            *this.pending_transcript.lock() = combined;
            return;
        }

        this.pending_transcript.lock().clear();
        this.set_state(SessionState::Processing);
        Self::spawn_response(this, combined);
    }

    fn spawn_response(this: &Arc<Self>, text: String) {
        let bail = Arc::new(AtomicBool::new(false));
        *this.bail.lock() = bail.clone();
        let session = this.clone();
        tokio::spawn(async move {
            session.run_response(text, bail).await;
        });
    }

    /// One turn's response: agent events → narrator → TTS player.
    async fn run_response(&self, text: String, bail: Arc<AtomicBool>) {
        let (side_tx, mut side_rx) = mpsc::channel::<TextChunk>(8);
        let mut narrator = Narrator::new(self.config.summary_interval, side_tx);
        let (chunk_tx, chunk_rx) = mpsc::channel::<TextChunk>(32);

        let player = self.player.clone();
        let player_task = tokio::spawn(async move { player.speak_stream(chunk_rx).await });

        let mut stream = match self.agent.send_message(&text).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("agent send failed: {}", e);
                let _ = self.event_tx.send(SessionEvent::Error(e.to_string()));
                drop(chunk_tx);
                let _ = player_task.await;
                self.finish_response(&bail).await;
                return;
            },
        };

        let mut saw_first_text = false;
        loop {
            if bail.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                // tool summaries go out the moment the timer fires
                Some(summary) = side_rx.recv() => {
                    if chunk_tx.send(summary).await.is_err() {
                        break;
                    }
                }

                event = stream.next() => {
                    let Some(event) = event else { break };

                    if !saw_first_text {
                        if let AgentEvent::TextDelta(_) = &event {
                            saw_first_text = true;
                            self.set_state(SessionState::Speaking);
                        }
                    }
                    if let AgentEvent::Error(message) = &event {
                        tracing::error!("agent error: {}", message);
                        let _ = self.event_tx.send(SessionEvent::Error(message.clone()));
                    }

                    let turn_done = matches!(event, AgentEvent::Result);
                    for chunk in narrator.process_event(&event) {
                        if chunk_tx.send(chunk).await.is_err() {
                            break;
                        }
                    }
                    if turn_done {
                        break;
                    }
                }
            }
        }

        if !bail.load(Ordering::SeqCst) {
            if let Some(chunk) = narrator.flush() {
                let _ = chunk_tx.send(chunk).await;
            }
        }
        narrator.reset();
        drop(chunk_tx);

        match player_task.await {
            Ok(Err(e)) => {
                tracing::error!("playback failed: {}", e);
                let _ = self.event_tx.send(SessionEvent::Error(e.to_string()));
            },
            Err(e) => tracing::error!("player task panicked: {}", e),
            Ok(Ok(())) => {},
        }

        self.finish_response(&bail).await;
    }

    async fn finish_response(&self, bail: &AtomicBool) {
        if bail.load(Ordering::SeqCst) {
            // interruption already moved us to Listening with
            // accumulation left on; no chime over the user's speech
            return;
        }

        // a countdown armed near the end of playback has nothing left to
        // interrupt; any captured speech continues as a normal utterance
        self.disarm_barge_in();
        self.set_state(SessionState::Listening);
        self.vad.reset();
        self.endpointer.reset();
        if let Err(e) = self.transport.play_chime().await {
            tracing::warn!("chime failed: {}", e);
        }
        let _ = self.event_tx.send(SessionEvent::ResponseComplete);
    }

    async fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }

        self.disarm_barge_in();
        self.bail.lock().store(true, Ordering::SeqCst);
        self.stop_notify.notify_one();
        self.agent.close().await;
        self.transport.close().await;
        self.set_state(SessionState::Idle);
        let _ = self.event_tx.send(SessionEvent::Stopped);
        tracing::info!("session stopped");
    }

    fn current_state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, new: SessionState) {
        let old = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, new)
        };
        if old != new {
            tracing::info!(from = ?old, to = ?new, "session state");
            let _ = self.event_tx.send(SessionEvent::StateChanged { old, new });
        }
    }
}
