//! Per-document lifecycle state and the result types the pipeline emits.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Stage, StageError};

/// Lifecycle of one document. `Failed` is reachable from any non-terminal
/// state; `Empty` only from `Extracted`, for documents that parsed but had
/// no text to summarize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Discovered,
    Fetching,
    Fetched,
    Extracting,
    Extracted,
    Summarizing,
    Done,
    Empty,
    Failed,
}

impl DocumentState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Empty | Self::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_advance(self, next: Self) -> bool {
        match (self, next) {
            (Self::Discovered, Self::Fetching)
            | (Self::Fetching, Self::Fetched)
            | (Self::Fetched, Self::Extracting)
            | (Self::Extracting, Self::Extracted)
            | (Self::Extracted, Self::Summarizing | Self::Empty)
            | (Self::Summarizing, Self::Done) => true,
            (from, Self::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Success,
    PartialSuccess,
    Failed,
}

/// Outcome of summarizing one document.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryResult {
    pub document_url: String,
    pub summary: String,
    /// Per-chunk summaries in chunk order; dropped chunks are absent.
    pub chunk_summaries: Vec<String>,
    /// Total LLM call attempts spent on this document, including retries.
    pub attempts: u32,
    pub status: SummaryStatus,
    /// True when the document had no text to summarize.
    pub empty: bool,
    /// Extraction warnings (skipped pages, missing text layer).
    pub warnings: Vec<String>,
    pub page_count: usize,
    /// Payload size; filled in once fetch metadata is known, zero until then.
    pub size_bytes: u64,
    /// `None` for documents that never went through the fetch stage.
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Terminal failure of one document, with the stage it failed in.
#[derive(Debug)]
pub struct FailureRecord {
    pub url: String,
    pub error: StageError,
    /// Tries consumed in the stage that failed.
    pub attempts: u32,
}

impl FailureRecord {
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.error.stage()
    }
}

/// One entry of the pipeline's result stream.
#[derive(Debug)]
pub enum DocumentOutcome {
    Summary(SummaryResult),
    Failure(FailureRecord),
}

impl DocumentOutcome {
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Summary(s) => &s.document_url,
            Self::Failure(f) => &f.url,
        }
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// Terminal-state tally for a finished run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub done: usize,
    pub empty: usize,
    pub failed: usize,
    pub in_flight: usize,
}

/// Tracks every accepted document's state. Transitions are validated, so a
/// stage handler bug surfaces as a logged refusal instead of silent
/// corruption.
#[derive(Debug, Default)]
pub struct StateTracker {
    states: Mutex<HashMap<String, DocumentState>>,
}

impl StateTracker {
    /// Register a freshly accepted URL as `Discovered`.
    pub fn track(&self, url: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_owned(), DocumentState::Discovered);
    }

    /// Advance `url` to `next`. Returns `false` and leaves the state
    /// untouched when the transition is illegal or the URL is unknown.
    pub fn advance(&self, url: &str, next: DocumentState) -> bool {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = states.get_mut(url) else {
            tracing::error!(url, to = ?next, "state transition for untracked URL");
            return false;
        };
        if !state.can_advance(next) {
            tracing::error!(url, from = ?*state, to = ?next, "illegal state transition");
            return false;
        }
        *state = next;
        true
    }

    #[must_use]
    pub fn get(&self, url: &str) -> Option<DocumentState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied()
    }

    #[must_use]
    pub fn counts(&self) -> StateCounts {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let mut counts = StateCounts::default();
        for state in states.values() {
            match state {
                DocumentState::Done => counts.done += 1,
                DocumentState::Empty => counts.empty += 1,
                DocumentState::Failed => counts.failed += 1,
                _ => counts.in_flight += 1,
            }
        }
        counts
    }
}
