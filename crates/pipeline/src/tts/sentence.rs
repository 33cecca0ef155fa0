//! Sentence buffering
//!
//! Streaming fragments accumulate until a sentence boundary (terminal
//! punctuation followed by whitespace); flush chunks bypass buffering and
//! are emitted as-is. A minimum sentence length avoids micro-emissions on
//! ellipses and abbreviations.

use voiceloop_core::TextChunk;

/// Minimum emitted sentence length in characters
pub const MIN_SENTENCE_LEN: usize = 20;

/// Accumulates streaming text into synthesizable sentences.
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    buf: String,
    min_len: usize,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::with_min_len(MIN_SENTENCE_LEN)
    }

    pub fn with_min_len(min_len: usize) -> Self {
        Self {
            buf: String::new(),
            min_len,
        }
    }

    /// Feed one chunk; returns the sentences it completed.
    pub fn push(&mut self, chunk: &TextChunk) -> Vec<String> {
        match chunk {
            TextChunk::Flush(text) => {
                let text = text.trim();
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![text.to_string()]
                }
            },
            TextChunk::Streaming(fragment) => {
                self.buf.push_str(fragment);
                self.drain_complete()
            },
        }
    }

    fn drain_complete(&mut self) -> Vec<String> {
        let mut sentences = Vec::new();
        while let Some(cut) = find_boundary(&self.buf, self.min_len) {
            let sentence: String = self.buf.drain(..cut).collect();
            let rest = self.buf.trim_start().to_string();
            self.buf = rest;

            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
        }
        sentences
    }

    /// Emit any residue at end of input.
    pub fn finish(&mut self) -> Option<String> {
        let residue = std::mem::take(&mut self.buf);
        let residue = residue.trim();
        if residue.is_empty() {
            None
        } else {
            Some(residue.to_string())
        }
    }

    /// Pending (incomplete) text length.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

/// Byte index just past the first usable sentence boundary: terminal
/// punctuation followed by whitespace, at least `min_len` characters in.
fn find_boundary(buf: &str, min_len: usize) -> Option<usize> {
    let mut chars = buf.char_indices().peekable();
    let mut count = 0usize;
    while let Some((i, c)) = chars.next() {
        count += 1;
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() && count >= min_len {
                    return Some(i + c.len_utf8());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming(s: &str) -> TextChunk {
        TextChunk::Streaming(s.to_string())
    }

    #[test]
    fn test_flush_bypasses_buffering() {
        let mut buf = SentenceBuffer::new();
        let out = buf.push(&TextChunk::Flush("Running Write…".into()));
        assert_eq!(out, vec!["Running Write…".to_string()]);
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn test_streaming_waits_for_boundary() {
        let mut buf = SentenceBuffer::new();
        assert!(buf.push(&streaming("It is three ")).is_empty());
        let out = buf.push(&streaming("o'clock in the afternoon. And"));
        assert_eq!(out, vec!["It is three o'clock in the afternoon.".to_string()]);
        assert_eq!(buf.finish(), Some("And".to_string()));
    }

    #[test]
    fn test_short_sentences_accumulate() {
        let mut buf = SentenceBuffer::new();
        // "Yes. " alone is under the minimum; it merges with what follows
        assert!(buf.push(&streaming("Yes. ")).is_empty());
        let out = buf.push(&streaming("I can do that for you. More"));
        assert_eq!(out, vec!["Yes. I can do that for you.".to_string()]);
    }

    #[test]
    fn test_ellipsis_does_not_micro_emit() {
        let mut buf = SentenceBuffer::with_min_len(20);
        assert!(buf.push(&streaming("Well... ")).is_empty());
        assert!(buf.pending_len() > 0);
    }

    #[test]
    fn test_punctuation_without_whitespace_is_not_a_boundary() {
        let mut buf = SentenceBuffer::with_min_len(5);
        assert!(buf.push(&streaming("see example.com for details")).is_empty());
    }

    #[test]
    fn test_finish_emits_residue_once() {
        let mut buf = SentenceBuffer::new();
        buf.push(&streaming("trailing words"));
        assert_eq!(buf.finish(), Some("trailing words".to_string()));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_multiple_sentences_in_one_chunk() {
        let mut buf = SentenceBuffer::with_min_len(5);
        let out = buf.push(&streaming("One two three. Four five six! Seven"));
        assert_eq!(
            out,
            vec!["One two three.".to_string(), "Four five six!".to_string()]
        );
        assert_eq!(buf.finish(), Some("Seven".to_string()));
    }
}
