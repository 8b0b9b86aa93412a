//! Greedy paragraph chunking with verbatim trailing overlap.

/// A bounded-size segment of extracted text prepared for one model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub document_url: String,
    pub index: usize,
    pub text: String,
    pub approx_tokens: usize,
    /// Byte length of the leading region repeated from the previous chunk.
    pub overlap: usize,
    pub is_last: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("overlap_tokens ({overlap_tokens}) must be below max_tokens ({max_tokens})")]
pub struct ChunkBudgetError {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

/// Splits text into chunks of at most `max_tokens`, preferring paragraph
/// boundaries, then sentence boundaries, with a word-boundary hard split as
/// the last resort. Each chunk after the first repeats the trailing
/// `overlap_tokens` of its predecessor verbatim; the overlap shrinks only
/// when a single piece alone nearly fills the budget.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_tokens: usize,
    overlap_tokens: usize,
}

#[derive(Clone, Copy, PartialEq)]
enum Sep {
    /// Piece opens a paragraph.
    Paragraph,
    /// Piece continues a sentence split at a word boundary.
    Space,
    /// Piece carries its own leading whitespace from the sentence split.
    Glued,
}

struct Piece {
    text: String,
    sep: Sep,
}

impl Chunker {
    /// # Errors
    ///
    /// Returns [`ChunkBudgetError`] when `overlap_tokens >= max_tokens`; this
    /// is a configuration error, callers must fail fast rather than degrade
    /// per document.
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Result<Self, ChunkBudgetError> {
        if overlap_tokens >= max_tokens {
            return Err(ChunkBudgetError {
                max_tokens,
                overlap_tokens,
            });
        }
        Ok(Self {
            max_tokens,
            overlap_tokens,
        })
    }

    #[must_use]
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Split `text` into ordered chunks. Empty or whitespace-only input
    /// yields no chunks.
    #[must_use]
    pub fn chunk(&self, document_url: &str, text: &str) -> Vec<Chunk> {
        let pieces = self.pieces(text);
        if pieces.is_empty() {
            return Vec::new();
        }

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut current = String::new();
        let mut current_overlap = 0usize;
        let mut current_words = 0usize;

        for piece in &pieces {
            let piece_words = word_count(&piece.text);
            if !current.is_empty()
                && tokens_for_words(current_words + piece_words) > self.max_tokens
            {
                let flushed = std::mem::take(&mut current);
                let budget = self
                    .overlap_tokens
                    .min(self.max_tokens.saturating_sub(tokens_for_words(piece_words)));
                current = take_overlap(&flushed, budget).to_owned();
                push_chunk(&mut chunks, document_url, flushed, current_overlap, false);
                current_overlap = current.len();
                current_words = word_count(&current);
            }
            if !current.is_empty() {
                current.push_str(match piece.sep {
                    Sep::Paragraph => "\n\n",
                    Sep::Space => " ",
                    Sep::Glued => "",
                });
            }
            current.push_str(&piece.text);
            current_words += piece_words;
        }

        push_chunk(&mut chunks, document_url, current, current_overlap, true);
        chunks
    }

    /// Decompose text into pieces that each fit the budget.
    fn pieces(&self, text: &str) -> Vec<Piece> {
        let mut pieces = Vec::new();
        for paragraph in split_paragraphs(text) {
            if approx_tokens(paragraph) <= self.max_tokens {
                pieces.push(Piece {
                    text: paragraph.to_owned(),
                    sep: Sep::Paragraph,
                });
                continue;
            }
            let mut sep = Sep::Paragraph;
            for sentence in split_sentences(paragraph) {
                if approx_tokens(sentence) <= self.max_tokens {
                    pieces.push(Piece {
                        text: sentence.to_owned(),
                        sep,
                    });
                } else {
                    let mut group_sep = sep;
                    for group in split_words(sentence, self.max_tokens) {
                        pieces.push(Piece {
                            text: group,
                            sep: group_sep,
                        });
                        group_sep = Sep::Space;
                    }
                }
                sep = Sep::Glued;
            }
        }
        pieces
    }
}

fn push_chunk(
    chunks: &mut Vec<Chunk>,
    document_url: &str,
    text: String,
    overlap: usize,
    is_last: bool,
) {
    let approx_tokens = approx_tokens(&text);
    chunks.push(Chunk {
        document_url: document_url.to_owned(),
        index: chunks.len(),
        text,
        approx_tokens,
        overlap,
        is_last,
    });
}

/// Deterministic token estimate: ~4 tokens per 3 whitespace-separated words,
/// the usual prose ratio, within ~15% for English text.
#[must_use]
pub fn approx_tokens(text: &str) -> usize {
    tokens_for_words(word_count(text))
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn tokens_for_words(words: usize) -> usize {
    (words * 4).div_ceil(3)
}

fn split_paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Split after `.`, `!`, or `?` followed by a space; the space stays with the
/// next sentence so concatenation reproduces the paragraph exactly.
fn split_sentences(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    for i in 0..bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') && bytes.get(i + 1) == Some(&b' ') {
            out.push(&text[start..=i]);
            start = i + 1;
        }
    }
    if start < text.len() && !text[start..].trim().is_empty() {
        out.push(&text[start..]);
    }
    out
}

fn split_words(sentence: &str, max_tokens: usize) -> Vec<String> {
    let mut groups = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for word in sentence.split_whitespace() {
        if !current.is_empty() && tokens_for_words(current.len() + 1) > max_tokens {
            groups.push(current.join(" "));
            current.clear();
        }
        current.push(word);
    }
    if !current.is_empty() {
        groups.push(current.join(" "));
    }
    groups
}

/// Trailing slice of `text` worth at most `budget_tokens`, cut at a word
/// start so the slice is verbatim text.
fn take_overlap(text: &str, budget_tokens: usize) -> &str {
    if budget_tokens == 0 {
        return "";
    }
    let starts = word_starts(text);
    let mut taken = 0;
    let mut cut = text.len();
    for &offset in starts.iter().rev() {
        if tokens_for_words(taken + 1) > budget_tokens {
            break;
        }
        taken += 1;
        cut = offset;
    }
    &text[cut..]
}

fn word_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut prev_ws = true;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            prev_ws = true;
        } else {
            if prev_ws {
                starts.push(i);
            }
            prev_ws = false;
        }
    }
    starts
}
