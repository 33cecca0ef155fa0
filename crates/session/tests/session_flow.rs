//! End-to-end session scenarios over scripted components: a channel
//! transport, a queued recognizer, a generation-tagged synthesizer, and
//! an in-memory agent backend speaking the real wire protocol.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use voiceloop_agent::AgentSession;
use voiceloop_core::{AudioTransport, CoreError, SpeechRecognizer, SynthesisBackend, Transcript};
use voiceloop_pipeline::{EndpointConfig, Endpointer, TtsPlayer, VadConfig, VadProcessor};
use voiceloop_session::{ControllerConfig, SessionEvent, VoiceSession};

// ── scripted components ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Observed {
    Write(Vec<u8>),
    Interrupt,
    Resume,
    Chime,
    Closed,
}

struct MockTransport {
    mic_rx: parking_lot::Mutex<Option<mpsc::Receiver<Vec<f32>>>>,
    log: parking_lot::Mutex<Vec<Observed>>,
}

impl MockTransport {
    fn new() -> (Arc<Self>, mpsc::Sender<Vec<f32>>) {
        let (tx, rx) = mpsc::channel(256);
        (
            Arc::new(Self {
                mic_rx: parking_lot::Mutex::new(Some(rx)),
                log: parking_lot::Mutex::new(Vec::new()),
            }),
            tx,
        )
    }

    fn events(&self) -> Vec<Observed> {
        self.log.lock().clone()
    }

    fn count(&self, wanted: &Observed) -> usize {
        self.log.lock().iter().filter(|e| *e == wanted).count()
    }
}

#[async_trait]
impl AudioTransport for MockTransport {
    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<f32>>, CoreError> {
        self.mic_rx
            .lock()
            .take()
            .ok_or_else(|| CoreError::Transport("taken".into()))
    }

    async fn write_speaker(&self, pcm: &[u8]) -> Result<(), CoreError> {
        self.log.lock().push(Observed::Write(pcm.to_vec()));
        Ok(())
    }

    async fn interrupt(&self) {
        self.log.lock().push(Observed::Interrupt);
    }

    async fn resume(&self) {
        self.log.lock().push(Observed::Resume);
    }

    async fn play_chime(&self) -> Result<(), CoreError> {
        self.log.lock().push(Observed::Chime);
        Ok(())
    }

    async fn close(&self) {
        self.log.lock().push(Observed::Closed);
    }
}

struct MockRecognizer {
    script: parking_lot::Mutex<VecDeque<String>>,
    buffered: AtomicUsize,
    transcribed: AtomicUsize,
    cleared: AtomicUsize,
}

impl MockRecognizer {
    fn new(script: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            script: parking_lot::Mutex::new(script.iter().map(|s| s.to_string()).collect()),
            buffered: AtomicUsize::new(0),
            transcribed: AtomicUsize::new(0),
            cleared: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SpeechRecognizer for MockRecognizer {
    fn accumulate(&self, samples: Vec<f32>) {
        self.buffered.fetch_add(samples.len(), Ordering::SeqCst);
    }

    async fn transcribe(&self) -> Result<Transcript, CoreError> {
        assert!(
            self.buffered.swap(0, Ordering::SeqCst) > 0,
            "transcribe with an empty segment buffer"
        );
        self.transcribed.fetch_add(1, Ordering::SeqCst);
        let text = self.script.lock().pop_front().unwrap_or_default();
        Ok(Transcript::new(text))
    }

    fn clear_buffer(&self) {
        self.buffered.store(0, Ordering::SeqCst);
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

/// Synthesizer whose PCM bytes carry the generation number, so stale
/// audio from an interrupted turn is detectable at the transport.
struct TaggedSynth {
    generation: AtomicU8,
    chunks: usize,
    chunk_bytes: usize,
}

impl TaggedSynth {
    fn new(chunks: usize, chunk_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            generation: AtomicU8::new(0),
            chunks,
            chunk_bytes,
        })
    }
}

#[async_trait]
impl SynthesisBackend for TaggedSynth {
    async fn synthesize(&self, _text: &str) -> Result<mpsc::Receiver<Vec<u8>>, CoreError> {
        let tag = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(4);
        let chunks = self.chunks;
        let chunk_bytes = self.chunk_bytes;
        tokio::spawn(async move {
            for _ in 0..chunks {
                if tx.send(vec![tag; chunk_bytes]).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
        Ok(rx)
    }

    async fn cancel(&self) {}

    fn sample_rate(&self) -> u32 {
        24_000
    }
}

/// In-memory agent backend: answers each user message with the next
/// scripted turn, and closes an interrupted turn with its result line.
fn scripted_backend(turns: Vec<Vec<String>>) -> (Arc<AgentSession>, Arc<parking_lot::Mutex<Vec<String>>>) {
    let (session_writer, backend_reader) = tokio::io::duplex(65536);
    let (mut backend_writer, session_reader) = tokio::io::duplex(65536);
    let session = Arc::new(AgentSession::from_io(session_writer, session_reader));

    let user_lines = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen = user_lines.clone();

    tokio::spawn(async move {
        let mut turns: VecDeque<Vec<String>> = turns.into();
        let mut lines = BufReader::new(backend_reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let value: serde_json::Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(_) => continue,
            };
            match value["type"].as_str() {
                Some("user") => {
                    seen.lock().push(line.clone());
                    if let Some(turn) = turns.pop_front() {
                        for event in turn {
                            let _ = backend_writer
                                .write_all(format!("{}\n", event).as_bytes())
                                .await;
                        }
                    }
                },
                Some("control_request") => {
                    // an interrupt terminates the in-flight turn
                    let _ = backend_writer.write_all(b"{\"type\":\"result\"}\n").await;
                },
                _ => {},
            }
        }
    });

    (session, user_lines)
}

fn text_turn(fragments: &[&str], with_result: bool) -> Vec<String> {
    let mut lines = vec![
        r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#
            .to_string(),
    ];
    for fragment in fragments {
        lines.push(format!(
            r#"{{"type":"content_block_delta","index":0,"delta":{{"type":"text_delta","text":"{}"}}}}"#,
            fragment
        ));
    }
    lines.push(r#"{"type":"content_block_stop","index":0}"#.to_string());
    if with_result {
        lines.push(r#"{"type":"result"}"#.to_string());
    }
    lines
}

// ── harness ────────────────────────────────────────────────────────

struct Harness {
    session: VoiceSession,
    mic_tx: mpsc::Sender<Vec<f32>>,
    transport: Arc<MockTransport>,
    stt: Arc<MockRecognizer>,
    events: broadcast::Receiver<SessionEvent>,
    user_lines: Arc<parking_lot::Mutex<Vec<String>>>,
}

fn harness(
    stt_script: &[&str],
    turns: Vec<Vec<String>>,
    interruption_threshold: Duration,
    synth: Arc<TaggedSynth>,
) -> Harness {
    let (transport, mic_tx) = MockTransport::new();
    let stt = MockRecognizer::new(stt_script);
    let (agent, user_lines) = scripted_backend(turns);

    let vad = Arc::new(VadProcessor::energy(VadConfig {
        min_speech_frames: 2,
        min_silence_frames: 2,
        long_silence_frames: 1000,
        ..VadConfig::default()
    }));
    let endpointer = Arc::new(Endpointer::new(EndpointConfig::default()));
    let player = Arc::new(TtsPlayer::new(
        synth as Arc<dyn SynthesisBackend>,
        transport.clone() as Arc<dyn AudioTransport>,
    ));

    let config = ControllerConfig {
        stop_phrase: "stop listening".to_string(),
        interruption_threshold,
        summary_interval: Duration::from_millis(100),
        greeting_pcm: None,
        greeting_settle: Duration::from_millis(10),
    };

    let session = VoiceSession::new(
        config,
        transport.clone() as Arc<dyn AudioTransport>,
        vad,
        stt.clone() as Arc<dyn SpeechRecognizer>,
        endpointer,
        agent,
        player,
    );
    let events = session.subscribe();

    Harness {
        session,
        mic_tx,
        transport,
        stt,
        events,
        user_lines,
    }
}

fn speech_window() -> Vec<f32> {
    (0..512).map(|i| (i as f32 * 0.1).sin() * 0.5).collect()
}

fn silence_window() -> Vec<f32> {
    vec![0.0; 512]
}

async fn feed(mic: &mpsc::Sender<Vec<f32>>, speech: usize, silence: usize) {
    for _ in 0..speech {
        let _ = mic.send(speech_window()).await;
        tokio::time::sleep(Duration::from_millis(32)).await;
    }
    for _ in 0..silence {
        let _ = mic.send(silence_window()).await;
        tokio::time::sleep(Duration::from_millis(32)).await;
    }
}

async fn wait_for(events: &mut broadcast::Receiver<SessionEvent>, want: impl Fn(&SessionEvent) -> bool) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed");
        let hit = want(&event);
        seen.push(event);
        if hit {
            return seen;
        }
    }
}

fn states(seen: &[SessionEvent]) -> Vec<String> {
    seen.iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged { new, .. } => Some(format!("{:?}", new)),
            _ => None,
        })
        .collect()
}

// ── scenarios ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn happy_path_traverses_all_states() {
    let mut h = harness(
        &["what time is it"],
        vec![text_turn(&["It is ", "three o'clock."], true)],
        Duration::from_millis(800),
        TaggedSynth::new(1, 4800),
    );

    let session = h.session.clone();
    let run = tokio::spawn(async move { session.run().await });

    feed(&h.mic_tx, 4, 3).await;

    let seen = wait_for(&mut h.events, |e| {
        matches!(e, SessionEvent::ResponseComplete)
    })
    .await;

    assert_eq!(
        states(&seen),
        vec!["Listening", "Processing", "Speaking", "Listening"]
    );
    assert!(seen
        .iter()
        .any(|e| matches!(e, SessionEvent::FinalTranscript(t) if t == "what time is it")));

    // the response audio reached the speaker, and the ready chime played
    // at init plus once on the way back to Listening
    assert!(h.transport.count(&Observed::Chime) == 2);
    assert!(h
        .transport
        .events()
        .iter()
        .any(|e| matches!(e, Observed::Write(_))));

    h.session.stop().await;
    let _ = run.await;
}

#[tokio::test(start_paused = true)]
async fn stop_phrase_ends_session_without_agent_call() {
    let mut h = harness(
        &["okay stop listening"],
        vec![],
        Duration::from_millis(800),
        TaggedSynth::new(1, 480),
    );

    let session = h.session.clone();
    let run = tokio::spawn(async move { session.run().await });

    feed(&h.mic_tx, 4, 3).await;

    wait_for(&mut h.events, |e| matches!(e, SessionEvent::Stopped)).await;

    assert!(h.user_lines.lock().is_empty(), "agent was called");
    assert_eq!(h.transport.count(&Observed::Closed), 1);
    assert_eq!(h.session.state(), voiceloop_core::SessionState::Idle);

    let _ = run.await;
}

#[tokio::test(start_paused = true)]
async fn sustained_barge_in_interrupts_and_recovers() {
    // turn 1 never ends on its own: its result only follows the interrupt
    let mut h = harness(
        &["first question", "what about tomorrow"],
        vec![
            // trailing whitespace closes the sentence so synthesis of
            // turn 1 actually starts before the barge-in
            text_turn(
                &["This is a very long answer that will keep playing for a while. "],
                false,
            ),
            text_turn(&["Tomorrow looks clear."], true),
        ],
        Duration::from_millis(100),
        TaggedSynth::new(40, 4800),
    );

    let session = h.session.clone();
    let run = tokio::spawn(async move { session.run().await });

    // turn 1
    feed(&h.mic_tx, 4, 3).await;
    wait_for(&mut h.events, |e| {
        matches!(e, SessionEvent::StateChanged { new, .. } if *new == voiceloop_core::SessionState::Speaking)
    })
    .await;

    // user speaks over the response past the threshold
    feed(&h.mic_tx, 8, 0).await;
    let seen = wait_for(&mut h.events, |e| matches!(e, SessionEvent::BargeIn)).await;
    assert!(states(&seen).contains(&"Listening".to_string()));
    assert_eq!(h.transport.count(&Observed::Interrupt), 1);

    // the interrupting utterance completes and becomes the next turn
    feed(&h.mic_tx, 0, 3).await;
    let seen = wait_for(&mut h.events, |e| {
        matches!(e, SessionEvent::ResponseComplete)
    })
    .await;
    assert!(seen
        .iter()
        .any(|e| matches!(e, SessionEvent::FinalTranscript(t) if t == "what about tomorrow")));

    // no PCM synthesized for turn 1 reached the speaker after the
    // interrupt: generation-1 bytes all precede it
    let events = h.transport.events();
    let interrupt_idx = events
        .iter()
        .position(|e| *e == Observed::Interrupt)
        .unwrap();
    for event in &events[interrupt_idx + 1..] {
        if let Observed::Write(bytes) = event {
            assert!(
                bytes.iter().all(|&b| b == 2),
                "stale turn-1 audio leaked after interrupt"
            );
        }
    }

    // both user turns were transcribed
    assert_eq!(h.stt.transcribed.load(Ordering::SeqCst), 2);

    h.session.stop().await;
    let _ = run.await;
}

#[tokio::test(start_paused = true)]
async fn short_speech_during_playback_is_a_false_alarm() {
    let mut h = harness(
        &["tell me something long"],
        vec![text_turn(
            &["Here is a long story that takes quite a while to read aloud."],
            true,
        )],
        Duration::from_millis(500),
        TaggedSynth::new(20, 4800), // ~2 s of audio
    );

    let session = h.session.clone();
    let run = tokio::spawn(async move { session.run().await });

    feed(&h.mic_tx, 4, 3).await;
    wait_for(&mut h.events, |e| {
        matches!(e, SessionEvent::StateChanged { new, .. } if *new == voiceloop_core::SessionState::Speaking)
    })
    .await;

    // a 200 ms blip: too short to cross the 500 ms threshold
    feed(&h.mic_tx, 2, 3).await;

    // playback continues to completion with no interruption
    let seen = wait_for(&mut h.events, |e| {
        matches!(e, SessionEvent::ResponseComplete)
    })
    .await;

    assert!(
        !seen.iter().any(|e| matches!(e, SessionEvent::BargeIn)),
        "false alarm triggered a barge-in"
    );
    assert_eq!(h.transport.count(&Observed::Interrupt), 0);
    // the blip's audio was discarded, not transcribed
    assert_eq!(h.stt.cleared.load(Ordering::SeqCst), 1);
    assert_eq!(h.stt.transcribed.load(Ordering::SeqCst), 1);

    h.session.stop().await;
    let _ = run.await;
}

#[tokio::test(start_paused = true)]
async fn empty_transcript_is_silently_discarded() {
    let mut h = harness(
        &[""],
        vec![],
        Duration::from_millis(800),
        TaggedSynth::new(1, 480),
    );

    let session = h.session.clone();
    let run = tokio::spawn(async move { session.run().await });

    feed(&h.mic_tx, 4, 3).await;

    // give the controller time to (not) react
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(h.user_lines.lock().is_empty());
    assert_eq!(
        h.session.state(),
        voiceloop_core::SessionState::Listening
    );

    h.session.stop().await;
    let _ = run.await;

    // drain: no FinalTranscript was ever emitted
    let mut saw_transcript = false;
    while let Ok(event) = h.events.try_recv() {
        if matches!(event, SessionEvent::FinalTranscript(_)) {
            saw_transcript = true;
        }
    }
    assert!(!saw_transcript);
}

#[tokio::test(start_paused = true)]
async fn mic_stream_closing_stops_the_session() {
    let mut h = harness(
        &[],
        vec![],
        Duration::from_millis(800),
        TaggedSynth::new(1, 480),
    );

    let session = h.session.clone();
    let run = tokio::spawn(async move { session.run().await });

    // capture helper dies
    drop(h.mic_tx);

    wait_for(&mut h.events, |e| matches!(e, SessionEvent::Stopped)).await;
    assert_eq!(h.session.state(), voiceloop_core::SessionState::Idle);
    let _ = run.await;
}
