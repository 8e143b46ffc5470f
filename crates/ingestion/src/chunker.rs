//! Text chunking module
//!
//! Cleans extracted document text and packs it into overlapping chunks that
//! never split a sentence. Sizes are counted in characters, not bytes.
//!
//! Two strategies share the same [`TextChunker::clean_text`] step:
//! - [`TextChunker::chunk_text`] packs sentences and carries trailing
//!   sentences forward as overlap.
//! - [`TextChunker::chunk_by_paragraphs`] packs `\n\n`-separated paragraphs
//!   and carries at most one paragraph forward. Cleaning has already folded
//!   newlines into spaces by then, so in practice the whole cleaned text is
//!   one paragraph.
//!
//! `\s` matches Unicode whitespace, so non-breaking and em spaces from PDF
//! text collapse and end sentences like ASCII spaces do.

use docrag_common::config::{ChunkStrategy, ChunkingConfig};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Chunks with this many characters or fewer (after trimming) are dropped
pub const MIN_CHUNK_CHARS: usize = 50;

/// Sentences with this many characters or fewer are treated as noise
pub const MIN_SENTENCE_CHARS: usize = 10;

fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

fn page_label() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(page|Page)\s+\d+\b").expect("valid regex"))
}

fn page_fraction() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\s*/\s*\d+").expect("valid regex"))
}

fn blank_lines() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").expect("valid regex"))
}

fn sentence_end() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+\s+").expect("valid regex"))
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Sentence-aware text chunker
#[derive(Debug, Clone)]
pub struct TextChunker {
    /// Target maximum characters per chunk. A single longer sentence still
    /// becomes its own chunk.
    pub chunk_size: usize,
    /// Maximum characters of trailing sentences repeated at the start of the
    /// next chunk
    pub chunk_overlap: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(500, 50)
    }
}

impl From<&ChunkingConfig> for TextChunker {
    fn from(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Normalize whitespace and strip page-number artifacts
    pub fn clean_text(&self, text: &str) -> String {
        let text = whitespace_run().replace_all(text, " ");
        let text = page_label().replace_all(&text, "");
        let text = page_fraction().replace_all(&text, "");
        // Runs after the whitespace collapse, so it only matters for input
        // that reaches here without passing the first rule.
        let text = blank_lines().replace_all(&text, "\n\n");
        text.trim().to_string()
    }

    /// Split on `.`/`!`/`?` runs followed by whitespace
    ///
    /// Candidates of ten characters or fewer are discarded.
    pub fn split_into_sentences<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut sentences = Vec::new();
        let mut start = 0;

        for m in sentence_end().find_iter(text) {
            let sentence = text[start..m.end()].trim();
            if char_len(sentence) > MIN_SENTENCE_CHARS {
                sentences.push(sentence);
            }
            start = m.end();
        }

        let rest = text[start..].trim();
        if char_len(rest) > MIN_SENTENCE_CHARS {
            sentences.push(rest);
        }

        sentences
    }

    /// Sentence-based chunking, the default ingestion path
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        let cleaned = self.clean_text(text);
        let sentences = self.split_into_sentences(&cleaned);
        if sentences.is_empty() {
            return Vec::new();
        }

        let chunks = self.pack(&sentences, " ", |finished| self.sentence_overlap(finished));

        debug!(
            sentences = sentences.len(),
            chunks = chunks.len(),
            chunk_size = self.chunk_size,
            "Text chunked by sentence"
        );
        chunks
    }

    /// Paragraph-based chunking
    pub fn chunk_by_paragraphs(&self, text: &str) -> Vec<String> {
        let cleaned = self.clean_text(text);
        let paragraphs: Vec<&str> = cleaned
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let chunks = self.pack(&paragraphs, "\n\n", |finished| match finished {
            [.., last] if finished.len() > 1 => vec![*last],
            _ => Vec::new(),
        });

        debug!(
            paragraphs = paragraphs.len(),
            chunks = chunks.len(),
            "Text chunked by paragraph"
        );
        chunks
    }

    /// Chunk with an explicitly selected strategy
    pub fn chunk_with(&self, strategy: ChunkStrategy, text: &str) -> Vec<String> {
        match strategy {
            ChunkStrategy::Sentence => self.chunk_text(text),
            ChunkStrategy::Paragraph => self.chunk_by_paragraphs(text),
        }
    }

    /// Longest run of trailing units whose combined length fits the overlap
    fn sentence_overlap<'a>(&self, finished: &[&'a str]) -> Vec<&'a str> {
        let mut taken = 0;
        let mut length = 0;
        for unit in finished.iter().rev() {
            let unit_len = char_len(unit);
            if length + unit_len > self.chunk_overlap {
                break;
            }
            length += unit_len;
            taken += 1;
        }
        finished[finished.len() - taken..].to_vec()
    }

    /// Greedy packing shared by both strategies
    ///
    /// The running length is the sum of unit lengths, separators excluded.
    /// When the next unit would overflow a non-empty buffer, the buffer is
    /// emitted and `carry` picks the units that seed the next one.
    fn pack<'a, F>(&self, units: &[&'a str], separator: &str, carry: F) -> Vec<String>
    where
        F: Fn(&[&'a str]) -> Vec<&'a str>,
    {
        let mut chunks = Vec::new();
        let mut current: Vec<&'a str> = Vec::new();
        let mut current_len = 0;

        for &unit in units {
            let unit_len = char_len(unit);
            if current_len + unit_len > self.chunk_size && !current.is_empty() {
                chunks.push(current.join(separator));
                current = carry(&current);
                current_len = current.iter().map(|u| char_len(u)).sum();
            }
            current.push(unit);
            current_len += unit_len;
        }

        if !current.is_empty() {
            chunks.push(current.join(separator));
        }

        chunks.retain(|chunk| char_len(chunk.trim()) > MIN_CHUNK_CHARS);
        chunks
    }
}

/// Sentence-based chunking with explicit sizes
pub fn chunk(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    TextChunker::new(chunk_size, chunk_overlap).chunk_text(text)
}
