//! URL intake: normalization, process-lifetime dedup, bounded handoff to
//! the fetch workers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// A URL handed to the pipeline by the crawl side, before normalization.
#[derive(Debug, Clone)]
pub struct CandidateUrl {
    pub url: String,
    pub discovered_at: DateTime<Utc>,
    pub source_page: Option<String>,
}

impl CandidateUrl {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            discovered_at: Utc::now(),
            source_page: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, page: impl Into<String>) -> Self {
        self.source_page = Some(page.into());
        self
    }
}

/// Canonical form used for dedup and output naming: lowercased scheme and
/// host, default port stripped, fragment removed, query pairs sorted.
/// Returns `None` for anything that is not a parseable http(s) URL.
#[must_use]
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = url::Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        url.set_query(Some(&query.finish()));
    }
    Some(url.into())
}

/// Check-and-insert set of normalized URLs. Never evicted; a URL is fetched
/// at most once per run no matter how many times it is discovered.
#[derive(Debug, Default)]
pub struct DedupSet {
    seen: Mutex<HashSet<String>>,
}

impl DedupSet {
    /// True when `normalized` was not seen before. Atomic: two racing
    /// callers can never both win.
    #[must_use = "a false return means the URL was already claimed"]
    pub fn insert(&self, normalized: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalized.to_owned())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct QueueInner {
    tx: Mutex<Option<mpsc::Sender<CandidateUrl>>>,
    dedup: DedupSet,
    accepted: AtomicUsize,
}

/// Deduplicated, bounded intake queue. Cloning shares the same dedup set
/// and channel; `close` on any clone closes them all.
///
/// Accepted candidates are forwarded with `url` already normalized, so
/// every downstream stage sees the canonical form.
#[derive(Clone)]
pub struct FetchQueue {
    inner: Arc<QueueInner>,
}

impl FetchQueue {
    /// Create the queue and the receiving end the fetch workers drain.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CandidateUrl>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                inner: Arc::new(QueueInner {
                    tx: Mutex::new(Some(tx)),
                    dedup: DedupSet::default(),
                    accepted: AtomicUsize::new(0),
                }),
            },
            rx,
        )
    }

    /// Offer a candidate. Returns `false` when the URL is unparseable,
    /// already seen, or the queue is closed. Waits when the queue is full
    /// rather than dropping work.
    pub async fn enqueue(&self, candidate: CandidateUrl) -> bool {
        let Some(tx) = self
            .inner
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            return false;
        };
        let Some(normalized) = normalize_url(&candidate.url) else {
            tracing::warn!(url = %candidate.url, "skipping unparseable URL");
            return false;
        };
        if !self.inner.dedup.insert(&normalized) {
            tracing::debug!(url = %normalized, "duplicate URL skipped");
            return false;
        }
        let candidate = CandidateUrl {
            url: normalized,
            ..candidate
        };
        if tx.send(candidate).await.is_err() {
            return false;
        }
        self.inner.accepted.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Stop accepting candidates and release the channel so workers drain
    /// what was already accepted and exit. Idempotent.
    pub fn close(&self) {
        self.inner
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// URLs accepted so far; the pipeline owes one result per accepted URL.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.inner.accepted.load(Ordering::Acquire)
    }
}
