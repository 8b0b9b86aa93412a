//! Prompt construction for the map and reduce passes.

/// System preamble sent with every completion.
pub const SYSTEM_PROMPT: &str = "You are a summarization engine for fetched documents. \
     Answer with the summary text only, no preamble and no commentary.";

/// Prompt for one chunk of a document. `index` is 0-based.
#[must_use]
pub fn chunk_prompt(index: usize, total: usize, text: &str) -> String {
    format!(
        "Summarize part {part} of {total} of a document. Capture the concrete \
         facts, figures, names, and conclusions in plain prose.\n\n{text}",
        part = index + 1
    )
}

/// Prompt for the final reduce pass over surviving chunk summaries, in
/// original chunk order.
#[must_use]
pub fn reduce_prompt(chunk_summaries: &[String]) -> String {
    format!(
        "Combine these section summaries into one coherent summary of the \
         whole document. Remove repetition introduced by overlapping \
         sections.\n\n{}",
        chunk_summaries.join("\n\n")
    )
}
