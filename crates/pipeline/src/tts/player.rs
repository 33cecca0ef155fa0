//! TTS player
//!
//! Pipelines text chunks through sentence buffering and a synthesis
//! backend, writes the PCM to the audio transport, and tracks a playback
//! clock so callers resolve only after the audio has actually drained.
//!
//! Interruption is the central correctness concern here:
//! - the interrupt flag is polled by every read/write loop;
//! - the adapter's speaker buffer is cleared immediately;
//! - the backend is cancelled (and, for backends that cannot cancel,
//!   stale PCM is drained by the backend itself);
//! - `resume()` runs exactly once per interrupt, before the first write
//!   of the next utterance, and never otherwise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use voiceloop_core::{AudioTransport, CoreError, SynthesisBackend, TextChunk};

use super::sentence::{SentenceBuffer, MIN_SENTENCE_LEN};

/// Player configuration
#[derive(Debug, Clone)]
pub struct TtsPlayerConfig {
    /// Minimum emitted sentence length
    pub min_sentence_len: usize,
    /// Poll interval while waiting out the playback drain
    pub drain_poll: Duration,
}

impl Default for TtsPlayerConfig {
    fn default() -> Self {
        Self {
            min_sentence_len: MIN_SENTENCE_LEN,
            drain_poll: Duration::from_millis(20),
        }
    }
}

/// Synthesize-and-play engine
pub struct TtsPlayer {
    backend: Arc<dyn SynthesisBackend>,
    transport: Arc<dyn AudioTransport>,
    config: TtsPlayerConfig,
    interrupted: AtomicBool,
    /// Set by interrupt(); consumed by the first write of the next call
    pending_resume: AtomicBool,
    speaking: AtomicBool,
}

impl TtsPlayer {
    pub fn new(backend: Arc<dyn SynthesisBackend>, transport: Arc<dyn AudioTransport>) -> Self {
        Self::with_config(backend, transport, TtsPlayerConfig::default())
    }

    pub fn with_config(
        backend: Arc<dyn SynthesisBackend>,
        transport: Arc<dyn AudioTransport>,
        config: TtsPlayerConfig,
    ) -> Self {
        Self {
            backend,
            transport,
            config,
            interrupted: AtomicBool::new(false),
            pending_resume: AtomicBool::new(false),
            speaking: AtomicBool::new(false),
        }
    }

    /// One-shot synth-and-play; resolves when playback drains.
    pub async fn speak(&self, text: &str) -> Result<(), CoreError> {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(TextChunk::Flush(text.to_string())).await;
        drop(tx);
        self.speak_stream(rx).await
    }

    /// Pipelined synth-and-play over a chunk stream; resolves when the
    /// stream ends and playback drains, or early on interrupt.
    pub async fn speak_stream(&self, chunks: mpsc::Receiver<TextChunk>) -> Result<(), CoreError> {
        self.interrupted.store(false, Ordering::SeqCst);
        self.speaking.store(true, Ordering::SeqCst);
        let result = self.run_stream(chunks).await;
        self.speaking.store(false, Ordering::SeqCst);
        result
    }

    async fn run_stream(&self, mut chunks: mpsc::Receiver<TextChunk>) -> Result<(), CoreError> {
        let mut sentences = SentenceBuffer::with_min_len(self.config.min_sentence_len);
        let mut finish_at: Option<Instant> = None;

        'stream: while let Some(chunk) = chunks.recv().await {
            if self.is_interrupted() {
                break;
            }
            for sentence in sentences.push(&chunk) {
                if !self.play_sentence(&sentence, &mut finish_at).await? {
                    break 'stream;
                }
            }
        }

        if !self.is_interrupted() {
            if let Some(residue) = sentences.finish() {
                self.play_sentence(&residue, &mut finish_at).await?;
            }
        }

        self.wait_for_drain(finish_at).await;
        Ok(())
    }

    /// Synthesize one sentence and write its PCM. Returns false when the
    /// stream should stop (interrupt observed).
    async fn play_sentence(
        &self,
        sentence: &str,
        finish_at: &mut Option<Instant>,
    ) -> Result<bool, CoreError> {
        if self.is_interrupted() {
            return Ok(false);
        }

        tracing::debug!(len = sentence.len(), "synthesizing sentence");
        let mut pcm_rx = self.backend.synthesize(sentence).await?;

        while let Some(chunk) = pcm_rx.recv().await {
            if self.is_interrupted() {
                self.backend.cancel().await;
                return Ok(false);
            }
            self.write_chunk(&chunk, finish_at).await?;
        }

        Ok(true)
    }

    async fn write_chunk(
        &self,
        chunk: &[u8],
        finish_at: &mut Option<Instant>,
    ) -> Result<(), CoreError> {
        if self.is_interrupted() {
            return Ok(());
        }

        if self.pending_resume.swap(false, Ordering::SeqCst) {
            self.transport.resume().await;
        }

        self.transport.write_speaker(chunk).await?;

        // Track when the speaker actually falls silent. max(now, finish_at)
        // handles delivery gaps longer than the previous chunk's audio
        // (tool calls); without it the clock runs behind and the player
        // resolves before the last chunk has played.
        let samples = chunk.len() / 2;
        let micros = samples as u64 * 1_000_000 / self.backend.sample_rate() as u64;
        let duration = Duration::from_micros(micros);

        let now = Instant::now();
        let base = match *finish_at {
            Some(t) if t > now => t,
            _ => now,
        };
        *finish_at = Some(base + duration);

        Ok(())
    }

    /// Wait out the playback clock, bailing early on interrupt.
    async fn wait_for_drain(&self, finish_at: Option<Instant>) {
        let Some(finish) = finish_at else { return };
        loop {
            if self.is_interrupted() {
                return;
            }
            let now = Instant::now();
            if now >= finish {
                return;
            }
            let remaining = finish - now;
            tokio::time::sleep(remaining.min(self.config.drain_poll)).await;
        }
    }

    /// Stop playback now: raise the flag every loop polls, clear the
    /// adapter's speaker buffer, cancel the backend, and arm the
    /// one-shot resume for the next utterance.
    pub async fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.transport.interrupt().await;
        self.backend.cancel().await;
        self.pending_resume.store(true, Ordering::SeqCst);
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU8;

    /// What the transport observed, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Observed {
        Write(Vec<u8>),
        Interrupt,
        Resume,
        Chime,
    }

    #[derive(Default)]
    struct RecordingTransport {
        log: Mutex<Vec<(Observed, Duration)>>,
        epoch: Mutex<Option<Instant>>,
    }

    impl RecordingTransport {
        fn record(&self, event: Observed) {
            let mut epoch = self.epoch.lock();
            let start = *epoch.get_or_insert_with(Instant::now);
            self.log.lock().push((event, start.elapsed()));
        }

        fn events(&self) -> Vec<Observed> {
            self.log.lock().iter().map(|(e, _)| e.clone()).collect()
        }

        fn timed(&self) -> Vec<(Observed, Duration)> {
            self.log.lock().clone()
        }
    }

    #[async_trait]
    impl AudioTransport for RecordingTransport {
        async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<f32>>, CoreError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn write_speaker(&self, pcm: &[u8]) -> Result<(), CoreError> {
            self.record(Observed::Write(pcm.to_vec()));
            Ok(())
        }

        async fn interrupt(&self) {
            self.record(Observed::Interrupt);
        }

        async fn resume(&self) {
            self.record(Observed::Resume);
        }

        async fn play_chime(&self) -> Result<(), CoreError> {
            self.record(Observed::Chime);
            Ok(())
        }

        async fn close(&self) {}
    }

    /// Backend whose output bytes carry a generation tag.
    struct TaggedBackend {
        generation: AtomicU8,
        chunk_bytes: usize,
        chunks_per_sentence: usize,
    }

    impl TaggedBackend {
        fn new(chunk_bytes: usize, chunks_per_sentence: usize) -> Self {
            Self {
                generation: AtomicU8::new(0),
                chunk_bytes,
                chunks_per_sentence,
            }
        }
    }

    #[async_trait]
    impl SynthesisBackend for TaggedBackend {
        async fn synthesize(&self, _text: &str) -> Result<mpsc::Receiver<Vec<u8>>, CoreError> {
            let tag = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let (tx, rx) = mpsc::channel(4);
            let chunk_bytes = self.chunk_bytes;
            let count = self.chunks_per_sentence;
            tokio::spawn(async move {
                for _ in 0..count {
                    if tx.send(vec![tag; chunk_bytes]).await.is_err() {
                        break;
                    }
                    // emission pacing so an interrupt can land mid-sentence
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            });
            Ok(rx)
        }

        async fn cancel(&self) {}

        fn sample_rate(&self) -> u32 {
            24_000
        }
    }

    fn player(
        backend: Arc<dyn SynthesisBackend>,
    ) -> (Arc<TtsPlayer>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let player = Arc::new(TtsPlayer::new(backend, transport.clone()));
        (player, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn test_speak_writes_and_waits_for_drain() {
        // one sentence, one chunk of 2400 samples = 100 ms of audio
        let backend = Arc::new(TaggedBackend::new(4800, 1));
        let (player, transport) = player(backend);

        let start = Instant::now();
        player.speak("hello from the player").await.unwrap();
        let elapsed = start.elapsed();

        let events = transport.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Observed::Write(_)));
        // resolves no earlier than the audio duration
        assert!(elapsed >= Duration::from_millis(100), "resolved at {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_covers_gapped_sentences() {
        // Three flush sentences, delivered with gaps longer than each
        // sentence's audio. The playback clock must not go "negative":
        // the player resolves no earlier than last-write + last-duration.
        let backend = Arc::new(TaggedBackend::new(2400, 1)); // 50 ms per sentence
        let (player, transport) = player(backend);

        let (tx, rx) = mpsc::channel(4);
        let feeder = tokio::spawn(async move {
            for text in ["Sentence number one.", "Sentence number two.", "Sentence three."] {
                let _ = tx.send(TextChunk::Flush(text.into())).await;
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
        });

        let start = Instant::now();
        player.speak_stream(rx).await.unwrap();
        let resolved = start.elapsed();
        feeder.await.unwrap();

        let timed = transport.timed();
        let (last_event, last_write_at) = timed.last().unwrap().clone();
        assert!(matches!(last_event, Observed::Write(_)));
        assert!(
            resolved >= last_write_at + Duration::from_millis(50),
            "resolved {resolved:?}, last write {last_write_at:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_purges_previous_generation() {
        let backend = Arc::new(TaggedBackend::new(64, 100));
        let (player, transport) = player(backend);

        let (tx, rx) = mpsc::channel(4);
        tx.send(TextChunk::Flush("a long interrupted sentence".into()))
            .await
            .unwrap();

        let p = player.clone();
        let stream_task = tokio::spawn(async move { p.speak_stream(rx).await });

        // let a few generation-1 chunks through, then barge in
        tokio::time::sleep(Duration::from_millis(12)).await;
        player.interrupt().await;
        stream_task.await.unwrap().unwrap();
        drop(tx);

        // next turn
        let backend2_events_before = transport.events().len();
        player.speak("the second turn reply").await.unwrap();

        let events = transport.events();
        let interrupt_idx = events
            .iter()
            .position(|e| *e == Observed::Interrupt)
            .expect("adapter interrupt observed");

        // no generation-1 PCM after the interrupt
        for event in &events[interrupt_idx + 1..] {
            if let Observed::Write(bytes) = event {
                assert!(
                    bytes.iter().all(|&b| b == 2),
                    "stale generation-1 bytes leaked after interrupt"
                );
            }
        }

        // resume ran exactly once, after the interrupt and before the
        // next turn's first write
        let resumes: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| **e == Observed::Resume)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(resumes.len(), 1);
        assert!(resumes[0] > interrupt_idx);
        assert!(resumes[0] >= backend2_events_before);
        let first_write_after = events[resumes[0] + 1..]
            .iter()
            .find(|e| matches!(e, Observed::Write(_)));
        assert!(first_write_after.is_some(), "resume preceded the next write");
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_never_called_without_interrupt() {
        let backend = Arc::new(TaggedBackend::new(240, 2));
        let (player, transport) = player(backend);

        player.speak("first ordinary utterance").await.unwrap();
        player.speak("second ordinary utterance").await.unwrap();

        assert!(transport.events().iter().all(|e| *e != Observed::Resume));
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_speaking_lifecycle() {
        let backend = Arc::new(TaggedBackend::new(2400, 1));
        let (player, _transport) = player(backend);

        assert!(!player.is_speaking());
        let p = player.clone();
        let task = tokio::spawn(async move { p.speak("a short lifecycle check").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(player.is_speaking());
        task.await.unwrap().unwrap();
        assert!(!player.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_chunks_buffer_into_sentences() {
        let backend = Arc::new(TaggedBackend::new(240, 1));
        let (player, transport) = player(backend);

        let (tx, rx) = mpsc::channel(8);
        for fragment in ["It is ", "three o'clock", ". Extra"] {
            tx.send(TextChunk::Streaming(fragment.into())).await.unwrap();
        }
        drop(tx);
        player.speak_stream(rx).await.unwrap();

        // one write for "It is three o'clock." and one for the residue
        let writes = transport
            .events()
            .iter()
            .filter(|e| matches!(e, Observed::Write(_)))
            .count();
        assert_eq!(writes, 2);
    }
}
