//! Agent-event narration
//!
//! Translates the agent's structured stream into speakable text. Text
//! deltas are stripped of lightweight markdown and forwarded as streaming
//! fragments; tool invocations produce an immediate "Running <tool>…"
//! sentence plus periodic "Still working on <tool>…" summaries on a side
//! channel while the tool is active.
//!
//! Summaries are emitted when the timer fires, never batched and released
//! at tool end — a caller waiting on the side channel hears them spread
//! across the tool's runtime.

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use voiceloop_core::{AgentEvent, TextChunk};

static FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^```[a-zA-Z0-9_-]*[ \t]*$").unwrap());
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]*)`").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}[ \t]+").unwrap());
static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*[-*+][ \t]+").unwrap());
static EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*_~]{1,3}").unwrap());

/// Strip lightweight markdown so the synthesizer never reads syntax
/// aloud. Lossy but idempotent: stripping twice yields the same output.
pub fn strip_markdown(text: &str) -> String {
    let text = FENCE.replace_all(text, "");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = LINK.replace_all(&text, "$1");
    let text = HEADING.replace_all(&text, "");
    let text = BULLET.replace_all(&text, "");
    let text = EMPHASIS.replace_all(&text, "");
    text.into_owned()
}

/// Characters that may open a markdown construct split across deltas.
/// A trailing run of these is held back until the next fragment arrives.
fn held_back_len(text: &str) -> usize {
    let mut held = 0usize;
    for c in text.chars().rev() {
        if matches!(c, '*' | '_' | '`' | '[' | '#' | '~') && held < 3 {
            held += c.len_utf8();
        } else {
            break;
        }
    }
    held
}

/// Agent-event → speakable-text translator
pub struct Narrator {
    summary_interval: Duration,
    side_tx: mpsc::Sender<TextChunk>,
    timer: Option<JoinHandle<()>>,
    carry: String,
}

impl Narrator {
    /// `side_tx` carries the timer-driven tool summaries; the caller
    /// forwards them to the TTS player as they arrive.
    pub fn new(summary_interval: Duration, side_tx: mpsc::Sender<TextChunk>) -> Self {
        Self {
            summary_interval,
            side_tx,
            timer: None,
            carry: String::new(),
        }
    }

    /// Translate one agent event into zero or more speakable chunks.
    pub fn process_event(&mut self, event: &AgentEvent) -> Vec<TextChunk> {
        match event {
            AgentEvent::TextDelta(text) => {
                self.carry.push_str(text);
                let held = held_back_len(&self.carry);
                let safe_len = self.carry.len() - held;
                if safe_len == 0 {
                    return Vec::new();
                }
                let rest = self.carry.split_off(safe_len);
                let safe = std::mem::replace(&mut self.carry, rest);
                let cleaned = strip_markdown(&safe);
                if cleaned.is_empty() {
                    Vec::new()
                } else {
                    vec![TextChunk::Streaming(cleaned)]
                }
            },

            AgentEvent::ToolStart(name) => {
                self.start_summary_timer(name);
                vec![TextChunk::Flush(format!("Running {}…", name))]
            },

            AgentEvent::ToolEnd => {
                self.cancel_summary_timer();
                Vec::new()
            },

            AgentEvent::Result | AgentEvent::Error(_) => {
                self.cancel_summary_timer();
                Vec::new()
            },
        }
    }

    /// Return any trailing held-back text at end of stream.
    pub fn flush(&mut self) -> Option<TextChunk> {
        self.cancel_summary_timer();
        let rest = std::mem::take(&mut self.carry);
        let cleaned = strip_markdown(&rest);
        if cleaned.trim().is_empty() {
            None
        } else {
            Some(TextChunk::Streaming(cleaned))
        }
    }

    /// Clear state between turns.
    pub fn reset(&mut self) {
        self.cancel_summary_timer();
        self.carry.clear();
    }

    fn start_summary_timer(&mut self, tool: &str) {
        self.cancel_summary_timer();

        let tx = self.side_tx.clone();
        let tool = tool.to_string();
        let period = self.summary_interval;

        self.timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately; summaries begin one
            // period into the tool call
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let chunk = TextChunk::Flush(format!("Still working on {}…", tool));
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        }));
    }

    fn cancel_summary_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Narrator {
    fn drop(&mut self) {
        self.cancel_summary_timer();
    }
}
