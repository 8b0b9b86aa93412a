//! Persistence of finished documents.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::SinkError;
use crate::state::{DocumentOutcome, SummaryStatus};

/// Write contract for finished documents. A failed write is logged by the
/// pipeline and never rolls the document's state back.
pub trait Sink: Send + Sync {
    fn write(
        &self,
        outcome: &DocumentOutcome,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

#[derive(Serialize)]
struct SummaryFile<'a> {
    result: &'static str,
    url: &'a str,
    status: SummaryStatus,
    summary: &'a str,
    chunk_summaries: &'a [String],
    attempts: u32,
    empty: bool,
    warnings: &'a [String],
    page_count: usize,
    size_bytes: u64,
    fetched_at: Option<DateTime<Utc>>,
    written_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct FailureFile<'a> {
    result: &'static str,
    url: &'a str,
    stage: &'static str,
    error: String,
    attempts: u32,
    written_at: DateTime<Utc>,
}

/// Writes one pretty-printed JSON file per document into a directory.
///
/// File names combine a sanitized stem from the URL's last path segment
/// with a short content hash of the full normalized URL, so distinct
/// documents never collide while reruns stay stable.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn file_name(url: &str) -> String {
        let hash = blake3::hash(url.as_bytes()).to_hex();
        format!("{}-{}.json", stem_of(url), &hash.as_str()[..8])
    }
}

fn stem_of(url: &str) -> String {
    let segment = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_owned))
        })
        .unwrap_or_default();
    let base = segment.rsplit_once('.').map_or(segment.clone(), |(b, _)| b.to_owned());
    let mut stem: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    stem.truncate(40);
    let stem = stem.trim_matches('-');
    if stem.is_empty() {
        "document".to_owned()
    } else {
        stem.to_owned()
    }
}

impl Sink for JsonDirSink {
    async fn write(&self, outcome: &DocumentOutcome) -> Result<(), SinkError> {
        let body = match outcome {
            DocumentOutcome::Summary(s) => serde_json::to_vec_pretty(&SummaryFile {
                result: "summary",
                url: &s.document_url,
                status: s.status,
                summary: &s.summary,
                chunk_summaries: &s.chunk_summaries,
                attempts: s.attempts,
                empty: s.empty,
                warnings: &s.warnings,
                page_count: s.page_count,
                size_bytes: s.size_bytes,
                fetched_at: s.fetched_at,
                written_at: Utc::now(),
            })?,
            DocumentOutcome::Failure(f) => serde_json::to_vec_pretty(&FailureFile {
                result: "failure",
                url: &f.url,
                stage: f.stage().as_str(),
                error: f.error.to_string(),
                attempts: f.attempts,
                written_at: Utc::now(),
            })?,
        };
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(Self::file_name(outcome.url()));
        tokio::fs::write(&path, body).await?;
        tracing::debug!(url = outcome.url(), path = %path.display(), "wrote result");
        Ok(())
    }
}

/// Collects outcomes in memory; used by tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    written: Arc<Mutex<Vec<(String, bool)>>>,
}

impl MemorySink {
    /// `(url, is_failure)` pairs in write order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, bool)> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Sink for MemorySink {
    async fn write(&self, outcome: &DocumentOutcome) -> Result<(), SinkError> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((outcome.url().to_owned(), outcome.is_failure()));
        Ok(())
    }
}
