//! Whitespace and control-character cleanup for extracted page text.

/// Clean one page of extracted text: control characters become spaces,
/// intra-line whitespace runs collapse to one space, line ends are trimmed,
/// and runs of blank lines collapse to a single paragraph break.
#[must_use]
pub fn clean_page(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_break = false;

    for line in raw.lines() {
        let cleaned = collapse_line(line);
        if cleaned.is_empty() {
            pending_break = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push_str(if pending_break { "\n\n" } else { "\n" });
        }
        out.push_str(&cleaned);
        pending_break = false;
    }

    out
}

/// Whitespace-insensitive form used when comparing reassembled text.
#[must_use]
pub fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collapse_line(line: &str) -> String {
    let mapped: String = line
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}
