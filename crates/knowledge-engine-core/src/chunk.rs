//! Boundary-aware text chunker with overlap.
//!
//! Splits document text into bounded [`ChunkDraft`]s. Every length here is
//! measured in Unicode scalar values, and a split never lands inside a
//! UTF-8 sequence.
//!
//! # Algorithm
//!
//! 1. A window runs from `start` to `min(start + max_chars, len)`.
//! 2. If the window reaches the end of the text, it is the last chunk.
//! 3. Otherwise the chunk ends at the last boundary the strategy accepts
//!    inside the tail of the window (`\n\n` for paragraphs, then a
//!    sentence terminator, then whitespace). The fixed strategy always
//!    cuts at `max_chars`. No boundary means a hard cut.
//! 4. The next window starts `overlap_chars` before the previous end, so
//!    the trailing span of one chunk is repeated at the head of the next.
//!
//! Because boundaries are only searched past `start + overlap_chars`, every
//! step advances and the sequence is finite. Dropping each draft's overlap
//! prefix and concatenating the remainder reproduces the input exactly.
//!
//! # Example
//!
//! ```rust
//! use knowledge_engine_core::chunk::{chunk_text, ChunkerConfig, SplitStrategy};
//!
//! let config = ChunkerConfig { max_chars: 1000, overlap_chars: 100, strategy: SplitStrategy::Fixed };
//! let text = "x".repeat(3000);
//! let drafts = chunk_text("doc-1", &text, &config).unwrap();
//! assert_eq!(drafts.len(), 4);
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, EngineResult};

/// Where the chunker prefers to end a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitStrategy {
    #[default]
    Paragraph,
    Sentence,
    Fixed,
}

impl FromStr for SplitStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paragraph" => Ok(SplitStrategy::Paragraph),
            "sentence" => Ok(SplitStrategy::Sentence),
            "fixed" => Ok(SplitStrategy::Fixed),
            other => Err(EngineError::Config(format!(
                "unknown split strategy '{}'; expected paragraph, sentence, or fixed",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub strategy: SplitStrategy,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        ChunkerConfig {
            max_chars: 1000,
            overlap_chars: 100,
            strategy: SplitStrategy::Paragraph,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_chars == 0 {
            return Err(EngineError::Config(
                "chunking.max_chars must be greater than zero".into(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(EngineError::Config(format!(
                "chunking.overlap_chars ({}) must be less than chunking.max_chars ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

/// A chunk candidate before it is assigned an id and persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub ordinal: i64,
    pub text: String,
    /// Byte span of `text` in the source.
    pub start: usize,
    pub end: usize,
    pub char_len: usize,
    /// Leading characters repeated from the previous draft.
    pub overlap_chars: usize,
    /// SHA-256 of `text`.
    pub hash: String,
}

impl ChunkDraft {
    /// The part of this draft not shared with its predecessor.
    pub fn fresh_text(&self) -> &str {
        let skip = self
            .text
            .char_indices()
            .nth(self.overlap_chars)
            .map(|(i, _)| i)
            .unwrap_or(self.text.len());
        &self.text[skip..]
    }
}

/// Restartable iterator over the drafts of one text.
///
/// Cloning the iterator snapshots its position; [`Chunker::resume_at`]
/// jumps to any ordinal.
#[derive(Debug, Clone)]
pub struct Chunker<'a> {
    text: &'a str,
    chars: Vec<char>,
    /// Byte offset of each char, plus the text length at the end.
    offsets: Vec<usize>,
    config: ChunkerConfig,
    next_start: usize,
    next_ordinal: i64,
    done: bool,
}

impl<'a> Chunker<'a> {
    pub fn new(text: &'a str, config: ChunkerConfig) -> EngineResult<Self> {
        config.validate()?;
        let mut chars = Vec::with_capacity(text.len());
        let mut offsets = Vec::with_capacity(text.len() + 1);
        for (i, c) in text.char_indices() {
            chars.push(c);
            offsets.push(i);
        }
        offsets.push(text.len());
        Ok(Chunker {
            text,
            done: chars.is_empty(),
            chars,
            offsets,
            config,
            next_start: 0,
            next_ordinal: 0,
        })
    }

    /// Restart the sequence and skip forward to `ordinal`.
    pub fn resume_at(&self, ordinal: i64) -> Self {
        let mut fresh = self.clone();
        fresh.next_start = 0;
        fresh.next_ordinal = 0;
        fresh.done = fresh.chars.is_empty();
        while fresh.next_ordinal < ordinal && fresh.next().is_some() {}
        fresh
    }

    fn find_break(&self, start: usize, hard_end: usize) -> usize {
        let floor = start + (self.config.overlap_chars + 1).max(self.config.max_chars / 2);
        if floor >= hard_end {
            return hard_end;
        }
        let paragraph = |e: usize| e >= 2 && self.chars[e - 2] == '\n' && self.chars[e - 1] == '\n';
        let sentence = |e: usize| {
            e >= 2
                && self.chars[e - 1].is_whitespace()
                && matches!(self.chars[e - 2], '.' | '!' | '?')
        };
        let space = |e: usize| self.chars[e - 1].is_whitespace();

        let last = |pred: &dyn Fn(usize) -> bool| (floor..=hard_end).rev().find(|&e| pred(e));

        match self.config.strategy {
            SplitStrategy::Fixed => hard_end,
            SplitStrategy::Paragraph => last(&paragraph)
                .or_else(|| last(&sentence))
                .or_else(|| last(&space))
                .unwrap_or(hard_end),
            SplitStrategy::Sentence => last(&sentence)
                .or_else(|| last(&space))
                .unwrap_or(hard_end),
        }
    }
}

impl Iterator for Chunker<'_> {
    type Item = ChunkDraft;

    fn next(&mut self) -> Option<ChunkDraft> {
        if self.done {
            return None;
        }
        let n = self.chars.len();
        let start = self.next_start;
        let hard_end = (start + self.config.max_chars).min(n);
        let end = if hard_end == n {
            n
        } else {
            self.find_break(start, hard_end)
        };

        let overlap = if self.next_ordinal == 0 {
            0
        } else {
            self.config.overlap_chars
        };
        let (byte_start, byte_end) = (self.offsets[start], self.offsets[end]);
        let text = &self.text[byte_start..byte_end];
        let draft = ChunkDraft {
            ordinal: self.next_ordinal,
            text: text.to_string(),
            start: byte_start,
            end: byte_end,
            char_len: end - start,
            overlap_chars: overlap,
            hash: content_hash(text.as_bytes()),
        };

        self.next_ordinal += 1;
        if end == n {
            self.done = true;
        } else {
            self.next_start = end - self.config.overlap_chars;
        }
        Some(draft)
    }
}

/// Split `text` into drafts. Fails when the text is empty after trimming.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    config: &ChunkerConfig,
) -> EngineResult<Vec<ChunkDraft>> {
    if text.trim().is_empty() {
        return Err(EngineError::invalid_document(
            document_id,
            "document is empty after trimming",
        ));
    }
    Ok(Chunker::new(text, *config)?.collect())
}

/// Hex SHA-256 of arbitrary bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: usize, overlap: usize, strategy: SplitStrategy) -> ChunkerConfig {
        ChunkerConfig {
            max_chars: max,
            overlap_chars: overlap,
            strategy,
        }
    }

    fn reconstruct(drafts: &[ChunkDraft]) -> String {
        drafts.iter().map(|d| d.fresh_text()).collect()
    }

    #[test]
    fn test_three_thousand_chars_make_four_chunks() {
        let text: String = (0..3000).map(|i| (b'a' + (i % 26) as u8) as char).collect();
        let drafts = chunk_text("doc1", &text, &config(1000, 100, SplitStrategy::Fixed)).unwrap();
        assert_eq!(drafts.len(), 4);
        for (i, d) in drafts.iter().enumerate() {
            assert_eq!(d.ordinal, i as i64);
            assert!(d.char_len <= 1000);
        }
        for pair in drafts.windows(2) {
            let tail: String = pair[0].text.chars().skip(pair[0].char_len - 100).collect();
            assert!(pair[1].text.starts_with(&tail));
            assert_eq!(pair[1].overlap_chars, 100);
        }
        assert_eq!(reconstruct(&drafts), text);
    }

    #[test]
    fn test_paragraph_strategy_prefers_blank_lines() {
        let para = "word ".repeat(30);
        let text = format!("{}\n\n{}\n\n{}", para, para, para);
        let drafts = chunk_text("doc1", &text, &config(200, 0, SplitStrategy::Paragraph)).unwrap();
        assert!(drafts.len() > 1);
        assert!(drafts[0].text.ends_with("\n\n"));
        assert_eq!(reconstruct(&drafts), text);
    }

    #[test]
    fn test_sentence_strategy_ends_on_terminator() {
        let text = "Returns are accepted within thirty days. ".repeat(20);
        let drafts = chunk_text("doc1", &text, &config(120, 10, SplitStrategy::Sentence)).unwrap();
        for d in &drafts[..drafts.len() - 1] {
            assert!(d.text.trim_end().ends_with('.'), "draft: {:?}", d.text);
        }
        assert_eq!(reconstruct(&drafts), text);
    }

    #[test]
    fn test_multibyte_text_never_split_inside_char() {
        let text = "┌──────────┐ héllo wörld ✓ ".repeat(40);
        for strategy in [SplitStrategy::Paragraph, SplitStrategy::Sentence, SplitStrategy::Fixed] {
            let drafts = chunk_text("doc1", &text, &config(37, 5, strategy)).unwrap();
            for d in &drafts {
                assert!(d.char_len <= 37);
                assert_eq!(d.text.chars().count(), d.char_len);
            }
            assert_eq!(reconstruct(&drafts), text);
        }
    }

    #[test]
    fn test_empty_and_whitespace_rejected() {
        let cfg = ChunkerConfig::default();
        assert!(matches!(
            chunk_text("doc1", "", &cfg),
            Err(EngineError::InvalidDocument { .. })
        ));
        assert!(chunk_text("doc1", " \n\t ", &cfg).is_err());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_max() {
        let err = chunk_text("doc1", "text", &config(100, 100, SplitStrategy::Fixed));
        assert!(matches!(err, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_resume_at_matches_full_run() {
        let text = "Alpha beta gamma. ".repeat(50);
        let chunker = Chunker::new(&text, config(64, 8, SplitStrategy::Sentence)).unwrap();
        let all: Vec<ChunkDraft> = chunker.clone().collect();
        let resumed: Vec<ChunkDraft> = chunker.resume_at(3).collect();
        assert_eq!(resumed, all[3..].to_vec());
    }

    #[test]
    fn test_deterministic_hashes() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let cfg = config(8, 2, SplitStrategy::Paragraph);
        let a = chunk_text("doc1", text, &cfg).unwrap();
        let b = chunk_text("doc1", text, &cfg).unwrap();
        assert_eq!(a, b);
    }
}
