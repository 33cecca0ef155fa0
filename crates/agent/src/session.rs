//! Persistent agent session
//!
//! Owns the backend process and two single-producer/single-consumer
//! queues: outbound user-message lines consumed by a writer task, and
//! inbound translated events produced by a pump task reading the
//! backend's stdout.
//!
//! Turn isolation: the pump tags every event with a turn number that
//! increments when a turn's terminal `result` line is observed, and
//! `send_message` numbers turns with the same counter on the send side.
//! A stream only yields events carrying its own turn number, so after an
//! `interrupt()` the remnants of the cancelled turn — which the backend
//! always closes with a `result` line — are skipped, never surfaced.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use voiceloop_config::AgentSettings;
use voiceloop_core::AgentEvent;

use crate::protocol::{interrupt_line, user_message_line, BackendLine, ContentBlock, Delta};
use crate::AgentError;

/// Agent backend configuration
#[derive(Debug, Clone)]
pub struct AgentSessionConfig {
    /// Backend binary
    pub binary: String,
    /// System prompt appended at spawn
    pub system_prompt: String,
    /// Permission mode passed to the backend
    pub permission_mode: String,
    /// Tools the backend may use; empty means backend defaults
    pub allowed_tools: Vec<String>,
}

impl From<&AgentSettings> for AgentSessionConfig {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            binary: settings.binary.clone(),
            system_prompt: settings.system_prompt.clone(),
            permission_mode: settings.permission_mode.clone(),
            allowed_tools: settings.allowed_tools.clone(),
        }
    }
}

type TaggedEvent = (u64, AgentEvent);

/// Persistent channel to the agent backend
pub struct AgentSession {
    outbound_tx: mpsc::Sender<String>,
    inbound: Arc<Mutex<mpsc::Receiver<TaggedEvent>>>,
    next_turn: AtomicU64,
    control_seq: AtomicU64,
    child: parking_lot::Mutex<Option<Child>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl AgentSession {
    /// Spawn the backend process. The process survives across turns;
    /// spawn cost is paid once, up-front.
    pub fn spawn(config: AgentSessionConfig) -> Result<Self, AgentError> {
        let mut command = Command::new(&config.binary);
        command
            .arg("--print")
            .args(["--input-format", "stream-json"])
            .args(["--output-format", "stream-json"])
            .arg("--verbose")
            .args(["--append-system-prompt", &config.system_prompt])
            .args(["--permission-mode", &config.permission_mode]);

        if !config.allowed_tools.is_empty() {
            command.args(["--allowed-tools", &config.allowed_tools.join(",")]);
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Spawn(format!("{}: {}", config.binary, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Spawn("backend stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Spawn("backend stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "agent_backend", "{}", line);
                }
            });
        }

        tracing::info!(binary = %config.binary, "agent backend spawned");

        let session = Self::from_io(stdin, stdout);
        *session.child.lock() = Some(child);
        Ok(session)
    }

    /// Build a session over raw streams. Tests script the backend side
    /// of the protocol through an in-memory duplex.
    pub fn from_io(
        writer: impl AsyncWrite + Send + Unpin + 'static,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TaggedEvent>(256);

        let writer_task = tokio::spawn(run_writer(writer, outbound_rx));
        let pump_task = tokio::spawn(run_pump(reader, inbound_tx));

        Self {
            outbound_tx,
            inbound: Arc::new(Mutex::new(inbound_rx)),
            next_turn: AtomicU64::new(0),
            control_seq: AtomicU64::new(0),
            child: parking_lot::Mutex::new(None),
            tasks: parking_lot::Mutex::new(vec![writer_task, pump_task]),
        }
    }

    /// Submit a user message and stream this turn's events.
    ///
    /// The returned stream holds the inbound queue for its lifetime, so
    /// only one turn can be consumed at a time; dropping the stream
    /// releases the queue and any unconsumed events of the turn are
    /// skipped by the next stream.
    pub async fn send_message(&self, text: &str) -> Result<EventStream, AgentError> {
        self.outbound_tx
            .send(user_message_line(text))
            .await
            .map_err(|_| AgentError::BackendClosed)?;

        let turn = self.next_turn.fetch_add(1, Ordering::SeqCst);
        let rx = self.inbound.clone().lock_owned().await;

        Ok(EventStream {
            rx,
            turn,
            done: false,
        })
    }

    /// Cancel the in-flight backend turn. Events already produced for
    /// the cancelled turn never leak into the next stream.
    pub async fn interrupt(&self) {
        let seq = self.control_seq.fetch_add(1, Ordering::SeqCst);
        if self.outbound_tx.send(interrupt_line(seq)).await.is_err() {
            tracing::debug!("interrupt after backend closed");
        }
    }

    /// Terminate the backend and the I/O tasks.
    pub async fn close(&self) {
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Lazy sequence of one turn's events.
///
/// Terminates after the turn's `Result` event, when the backend closes,
/// or when dropped. Events tagged with earlier turns (remnants of an
/// interrupted turn) are silently skipped.
pub struct EventStream {
    rx: OwnedMutexGuard<mpsc::Receiver<TaggedEvent>>,
    turn: u64,
    done: bool,
}

impl EventStream {
    pub async fn next(&mut self) -> Option<AgentEvent> {
        if self.done {
            return None;
        }

        loop {
            let Some((turn, event)) = self.rx.recv().await else {
                // backend died: the sequence closes
                self.done = true;
                return None;
            };

            if turn < self.turn {
                continue; // drained remnant of an interrupted turn
            }
            if turn > self.turn {
                self.done = true;
                return None;
            }

            if matches!(event, AgentEvent::Result) {
                self.done = true;
            }
            return Some(event);
        }
    }
}

async fn run_writer(
    mut writer: impl AsyncWrite + Send + Unpin,
    mut outbound_rx: mpsc::Receiver<String>,
) {
    while let Some(line) = outbound_rx.recv().await {
        let framed = format!("{}\n", line);
        if writer.write_all(framed.as_bytes()).await.is_err() {
            tracing::warn!("agent backend stdin closed");
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    Tool,
}

/// Per-turn translation state, reset at each `result` line.
#[derive(Default)]
struct TurnState {
    thinking_announced: bool,
    deltas_seen: bool,
    blocks: HashMap<usize, BlockKind>,
}

async fn run_pump(reader: impl AsyncRead + Send + Unpin, inbound_tx: mpsc::Sender<TaggedEvent>) {
    let mut lines = BufReader::new(reader).lines();
    let mut turn: u64 = 0;
    let mut state = TurnState::default();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        let parsed: BackendLine = match serde_json::from_str(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable backend line");
                continue;
            },
        };

        let mut events: Vec<AgentEvent> = Vec::new();
        let mut turn_over = false;

        match parsed {
            BackendLine::System { .. } | BackendLine::ControlResponse { .. } => {},

            BackendLine::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::Text { .. } => {
                    state.blocks.insert(index, BlockKind::Text);
                },
                ContentBlock::Thinking { .. } => {
                    state.blocks.insert(index, BlockKind::Thinking);
                    if !state.thinking_announced {
                        state.thinking_announced = true;
                        events.push(AgentEvent::TextDelta("Thinking… ".to_string()));
                    }
                },
                ContentBlock::ToolUse { name, .. } => {
                    state.blocks.insert(index, BlockKind::Tool);
                    events.push(AgentEvent::ToolStart(name));
                },
            },

            BackendLine::ContentBlockDelta { delta, .. } => match delta {
                Delta::TextDelta { text } => {
                    state.deltas_seen = true;
                    events.push(AgentEvent::TextDelta(text));
                },
                Delta::ThinkingDelta { .. } | Delta::InputJsonDelta { .. } => {},
            },

            BackendLine::ContentBlockStop { index } => {
                if state.blocks.remove(&index) == Some(BlockKind::Tool) {
                    events.push(AgentEvent::ToolEnd);
                }
            },

            BackendLine::Assistant { message } => {
                // fallback path: nothing streamed during the turn, so the
                // completed message yields the same events
                if !state.deltas_seen {
                    for block in message.content {
                        match block {
                            ContentBlock::Text { text } if !text.is_empty() => {
                                events.push(AgentEvent::TextDelta(text));
                            },
                            ContentBlock::ToolUse { name, .. } => {
                                events.push(AgentEvent::ToolStart(name));
                                events.push(AgentEvent::ToolEnd);
                            },
                            _ => {},
                        }
                    }
                }
            },

            BackendLine::Result { is_error, result } => {
                if is_error {
                    let message = result.unwrap_or_else(|| "agent backend error".to_string());
                    events.push(AgentEvent::Error(message));
                }
                events.push(AgentEvent::Result);
                turn_over = true;
            },
        }

        for event in events {
            if inbound_tx.send((turn, event)).await.is_err() {
                return; // session dropped
            }
        }

        if turn_over {
            turn += 1;
            state = TurnState::default();
        }
    }

    tracing::info!("agent backend stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    /// Session plus the two test-side halves: a reader that sees what the
    /// session writes, and a writer that plays the backend.
    fn scripted_session() -> (
        AgentSession,
        tokio::io::DuplexStream,
        tokio::io::DuplexStream,
    ) {
        let (session_writer, test_reader) = duplex(16384);
        let (test_writer, session_reader) = duplex(16384);
        let session = AgentSession::from_io(session_writer, session_reader);
        (session, test_reader, test_writer)
    }

    async fn write_line(writer: &mut tokio::io::DuplexStream, line: &str) {
        writer.write_all(line.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
    }

    async fn write_text_turn(writer: &mut tokio::io::DuplexStream, fragments: &[&str]) {
        write_line(
            writer,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        )
        .await;
        for fragment in fragments {
            write_line(
                writer,
                &format!(
                    r#"{{"type":"content_block_delta","index":0,"delta":{{"type":"text_delta","text":"{}"}}}}"#,
                    fragment
                ),
            )
            .await;
        }
        write_line(writer, r#"{"type":"content_block_stop","index":0}"#).await;
        write_line(writer, r#"{"type":"result"}"#).await;
    }

    #[tokio::test]
    async fn test_happy_turn_streams_in_order() {
        let (session, _out, mut backend) = scripted_session();

        write_text_turn(&mut backend, &["It is ", "three o'clock."]).await;

        let mut stream = session.send_message("what time is it").await.unwrap();
        assert_eq!(
            stream.next().await,
            Some(AgentEvent::TextDelta("It is ".into()))
        );
        assert_eq!(
            stream.next().await,
            Some(AgentEvent::TextDelta("three o'clock.".into()))
        );
        assert_eq!(stream.next().await, Some(AgentEvent::Result));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_outbound_user_message_shape() {
        let (session, out, mut backend) = scripted_session();

        write_text_turn(&mut backend, &["ok."]).await;
        let mut stream = session.send_message("hello backend").await.unwrap();
        while stream.next().await.is_some() {}

        let mut lines = BufReader::new(out).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["type"], "user");
        assert_eq!(v["message"]["content"][0]["text"], "hello backend");
    }

    #[tokio::test]
    async fn test_interrupted_turn_never_leaks_into_next() {
        let (session, _out, mut backend) = scripted_session();

        // turn 1 starts streaming
        write_line(
            &mut backend,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        )
        .await;
        write_line(
            &mut backend,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"turn-1 before interrupt"}}"#,
        )
        .await;

        let mut stream = session.send_message("first question").await.unwrap();
        assert_eq!(
            stream.next().await,
            Some(AgentEvent::TextDelta("turn-1 before interrupt".into()))
        );

        // barge-in: consumer abandons the stream and interrupts
        session.interrupt().await;
        drop(stream);

        // the backend still flushes the rest of the cancelled turn,
        // terminated by its result line
        write_line(
            &mut backend,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"turn-1 stale tail"}}"#,
        )
        .await;
        write_line(&mut backend, r#"{"type":"result"}"#).await;

        // turn 2
        write_text_turn(&mut backend, &["turn-2 reply."]).await;

        let mut stream2 = session.send_message("second question").await.unwrap();
        let mut texts = Vec::new();
        while let Some(event) = stream2.next().await {
            if let AgentEvent::TextDelta(t) = event {
                texts.push(t);
            }
        }
        assert_eq!(texts, vec!["turn-2 reply.".to_string()]);
    }

    #[tokio::test]
    async fn test_thinking_announced_once() {
        let (session, _out, mut backend) = scripted_session();

        write_line(
            &mut backend,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":""}}"#,
        )
        .await;
        write_line(&mut backend, r#"{"type":"content_block_stop","index":0}"#).await;
        write_line(
            &mut backend,
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"thinking","thinking":""}}"#,
        )
        .await;
        write_line(&mut backend, r#"{"type":"content_block_stop","index":1}"#).await;
        write_line(&mut backend, r#"{"type":"result"}"#).await;

        let mut stream = session.send_message("think hard").await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                AgentEvent::TextDelta("Thinking… ".into()),
                AgentEvent::Result
            ]
        );
    }

    #[tokio::test]
    async fn test_tool_blocks_map_to_start_and_end() {
        let (session, _out, mut backend) = scripted_session();

        write_line(
            &mut backend,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"Write"}}"#,
        )
        .await;
        write_line(&mut backend, r#"{"type":"content_block_stop","index":0}"#).await;
        write_line(
            &mut backend,
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"text","text":""}}"#,
        )
        .await;
        write_line(
            &mut backend,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"Done."}}"#,
        )
        .await;
        write_line(&mut backend, r#"{"type":"content_block_stop","index":1}"#).await;
        write_line(&mut backend, r#"{"type":"result"}"#).await;

        let mut stream = session.send_message("write the file").await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                AgentEvent::ToolStart("Write".into()),
                AgentEvent::ToolEnd,
                AgentEvent::TextDelta("Done.".into()),
                AgentEvent::Result,
            ]
        );
    }

    #[tokio::test]
    async fn test_fallback_full_message_when_no_deltas() {
        let (session, _out, mut backend) = scripted_session();

        write_line(
            &mut backend,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Full reply."}]}}"#,
        )
        .await;
        write_line(&mut backend, r#"{"type":"result"}"#).await;

        let mut stream = session.send_message("no streaming today").await.unwrap();
        assert_eq!(
            stream.next().await,
            Some(AgentEvent::TextDelta("Full reply.".into()))
        );
        assert_eq!(stream.next().await, Some(AgentEvent::Result));
    }

    #[tokio::test]
    async fn test_error_result_surfaces_error_then_terminates() {
        let (session, _out, mut backend) = scripted_session();

        write_line(
            &mut backend,
            r#"{"type":"result","is_error":true,"result":"backend exploded"}"#,
        )
        .await;

        let mut stream = session.send_message("boom").await.unwrap();
        assert_eq!(
            stream.next().await,
            Some(AgentEvent::Error("backend exploded".into()))
        );
        assert_eq!(stream.next().await, Some(AgentEvent::Result));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_backend_death_closes_stream() {
        let (session, _out, backend) = scripted_session();

        let mut stream = session.send_message("anyone there").await.unwrap();
        drop(backend); // backend process dies

        assert_eq!(stream.next().await, None);
    }
}
