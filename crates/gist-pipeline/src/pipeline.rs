//! Stage orchestration: fetch, extract, and summarize worker pools wired
//! by bounded channels, emitting exactly one outcome per accepted URL.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use gist_document::{Chunker, ExtractedDocument, PageRange};
use gist_llm::{LlmClient, LlmError};

use crate::config::Config;
use crate::error::{FatalError, StageError};
use crate::fetch::{FetchedDocument, Fetcher};
use crate::queue::{CandidateUrl, FetchQueue};
use crate::rate_limit::RateLimitedClient;
use crate::retry::Backoff;
use crate::sink::Sink;
use crate::state::{
    DocumentOutcome, DocumentState, FailureRecord, StateCounts, StateTracker, SummaryStatus,
};
use crate::summarizer::Summarizer;

/// Buffer between the stage workers and the collector. Small: the collector
/// only writes the sink and forwards, it never lags for long.
const OUTCOME_BUFFER: usize = 32;

/// End-of-run tally handed back by [`Pipeline::finish`].
#[derive(Debug)]
pub struct RunReport {
    /// URLs that passed dedup and entered the pipeline.
    pub accepted: usize,
    pub counts: StateCounts,
    /// Set when the run was aborted rather than drained.
    pub fatal: Option<FatalError>,
}

impl RunReport {
    /// True when the run completed without a fatal error. Per-document
    /// failures do not make a run unclean.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.fatal.is_none()
    }
}

type SharedReceiver<T> = Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>;

/// An extracted document plus the fetch metadata the sink persists.
struct StagedDocument {
    extracted: ExtractedDocument,
    size_bytes: u64,
    fetched_at: DateTime<Utc>,
}

async fn next_item<T>(rx: &tokio::sync::Mutex<mpsc::Receiver<T>>) -> Option<T> {
    rx.lock().await.recv().await
}

/// The running pipeline: URL intake on one side, a finite stream of
/// [`DocumentOutcome`] on the other.
///
/// Worker pools per stage are connected by bounded channels, so a slow
/// LLM backend applies backpressure to extraction and fetching instead of
/// buffering unboundedly. One document's failure never disturbs another;
/// only [`FatalError`] aborts the run.
pub struct Pipeline {
    queue: FetchQueue,
    results: mpsc::Receiver<DocumentOutcome>,
    tracker: Arc<StateTracker>,
    fatal: Arc<Mutex<Option<FatalError>>>,
    workers: JoinSet<()>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("accepted", &self.queue.accepted())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Validate `config` and spawn the stage pools. `shutdown` drains the
    /// pipeline when flipped: intake closes, in-flight documents finish
    /// without starting new retry waits, and the result stream ends.
    ///
    /// # Errors
    ///
    /// Configuration validation failures; these are fatal before any URL
    /// is consumed.
    pub fn spawn<C, S>(
        config: &Config,
        client: C,
        sink: S,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<Self>
    where
        C: LlmClient + 'static,
        S: Sink + 'static,
    {
        config.validate()?;
        let pages: PageRange = config
            .extract
            .pages
            .parse()
            .map_err(|e| anyhow::anyhow!("extract.pages: {e}"))?;
        let chunker = Chunker::new(config.chunk.budget(), config.chunk.overlap_tokens)?;
        let backoff = Backoff::from_config(&config.retry);
        let fetcher = Fetcher::new(
            config.fetch.request_timeout(),
            config.fetch.max_bytes_per_doc,
            config.fetch.max_retries,
            backoff.clone(),
        );
        let summarizer = Arc::new(Summarizer::new(
            Arc::new(RateLimitedClient::new(
                client,
                config.summarize.requests_per_second,
            )),
            chunker,
            &config.summarize,
            backoff,
        ));

        let tracker = Arc::new(StateTracker::default());
        let fatal: Arc<Mutex<Option<FatalError>>> = Arc::new(Mutex::new(None));
        let mut workers = JoinSet::new();

        let (queue, intake_rx) = FetchQueue::new(config.fetch.queue_capacity);
        let (fetched_tx, fetched_rx) = mpsc::channel::<FetchedDocument>(config.extract.concurrency);
        let (extracted_tx, extracted_rx) =
            mpsc::channel::<StagedDocument>(config.summarize.concurrency);
        let (outcome_tx, outcome_rx) = mpsc::channel::<DocumentOutcome>(OUTCOME_BUFFER);
        let (results_tx, results) = mpsc::channel::<DocumentOutcome>(OUTCOME_BUFFER);

        // Internal stop flag: flipped by the external shutdown signal or by
        // a fatal error, and observed by every retry sleep.
        let (stop_tx, stop_rx) = watch::channel(*shutdown.borrow());
        let stop_tx = Arc::new(stop_tx);

        workers.spawn(relay_shutdown(
            shutdown,
            Arc::clone(&stop_tx),
            queue.clone(),
        ));

        let intake_rx: SharedReceiver<CandidateUrl> =
            Arc::new(tokio::sync::Mutex::new(intake_rx));
        for _ in 0..config.fetch.concurrency {
            workers.spawn(fetch_worker(
                Arc::clone(&intake_rx),
                fetcher.clone(),
                Arc::clone(&tracker),
                fetched_tx.clone(),
                outcome_tx.clone(),
                stop_rx.clone(),
            ));
        }
        drop(fetched_tx);

        let fetched_rx: SharedReceiver<FetchedDocument> =
            Arc::new(tokio::sync::Mutex::new(fetched_rx));
        for _ in 0..config.extract.concurrency {
            workers.spawn(extract_worker(
                Arc::clone(&fetched_rx),
                pages,
                Arc::clone(&tracker),
                extracted_tx.clone(),
                outcome_tx.clone(),
            ));
        }
        drop(extracted_tx);

        let extracted_rx: SharedReceiver<StagedDocument> =
            Arc::new(tokio::sync::Mutex::new(extracted_rx));
        for _ in 0..config.summarize.concurrency {
            workers.spawn(summarize_worker(
                Arc::clone(&extracted_rx),
                Arc::clone(&summarizer),
                Arc::clone(&tracker),
                outcome_tx.clone(),
                stop_rx.clone(),
                Arc::clone(&stop_tx),
                queue.clone(),
                Arc::clone(&fatal),
            ));
        }
        drop(outcome_tx);

        workers.spawn(collect(outcome_rx, sink, results_tx));

        Ok(Self {
            queue,
            results,
            tracker,
            fatal,
            workers,
        })
    }

    /// Offer a candidate URL; see [`FetchQueue::enqueue`].
    pub async fn enqueue(&self, candidate: CandidateUrl) -> bool {
        self.queue.enqueue(candidate).await
    }

    /// A handle the crawl side can feed URLs through while results are
    /// being consumed.
    #[must_use]
    pub fn queue(&self) -> FetchQueue {
        self.queue.clone()
    }

    /// Stop accepting URLs; the result stream ends once everything already
    /// accepted has resolved.
    pub fn close_intake(&self) {
        self.queue.close();
    }

    /// Next finished document, in completion order. `None` once intake is
    /// closed and every accepted URL has produced its outcome.
    pub async fn next_result(&mut self) -> Option<DocumentOutcome> {
        self.results.recv().await
    }

    /// Close intake, wait for every worker to drain, and report.
    pub async fn finish(mut self) -> RunReport {
        self.queue.close();
        // Unblock the collector if the caller stopped consuming results.
        self.results.close();
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "pipeline worker panicked");
            }
        }
        RunReport {
            accepted: self.queue.accepted(),
            counts: self.tracker.counts(),
            fatal: self
                .fatal
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        }
    }
}

/// Propagate the external shutdown signal: close intake and flip the
/// internal stop flag so backoff sleeps end early.
async fn relay_shutdown(
    mut shutdown: watch::Receiver<bool>,
    stop_tx: Arc<watch::Sender<bool>>,
    queue: FetchQueue,
) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
    tracing::info!("shutdown requested, draining pipeline");
    queue.close();
    let _ = stop_tx.send(true);
}

async fn fetch_worker(
    rx: SharedReceiver<CandidateUrl>,
    fetcher: Fetcher,
    tracker: Arc<StateTracker>,
    fetched_tx: mpsc::Sender<FetchedDocument>,
    outcome_tx: mpsc::Sender<DocumentOutcome>,
    mut stop: watch::Receiver<bool>,
) {
    while let Some(candidate) = next_item(&rx).await {
        let url = candidate.url;
        tracker.track(&url);
        tracker.advance(&url, DocumentState::Fetching);
        if let Some(source) = &candidate.source_page {
            tracing::debug!(url, source, "fetching discovered document");
        }
        match fetcher.fetch(&url, &mut stop).await {
            Ok(doc) => {
                tracker.advance(&url, DocumentState::Fetched);
                if fetched_tx.send(doc).await.is_err() {
                    return;
                }
            }
            Err(failed) => {
                tracing::warn!(url, error = %failed.error, "document fetch failed");
                tracker.advance(&url, DocumentState::Failed);
                let record = FailureRecord {
                    url,
                    error: StageError::from(failed.error),
                    attempts: failed.attempts,
                };
                if outcome_tx
                    .send(DocumentOutcome::Failure(record))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}

async fn extract_worker(
    rx: SharedReceiver<FetchedDocument>,
    pages: PageRange,
    tracker: Arc<StateTracker>,
    extracted_tx: mpsc::Sender<StagedDocument>,
    outcome_tx: mpsc::Sender<DocumentOutcome>,
) {
    while let Some(doc) = next_item(&rx).await {
        let url = doc.url.clone();
        let size_bytes = doc.size_bytes;
        let fetched_at = doc.fetched_at;
        tracker.advance(&url, DocumentState::Extracting);
        tracing::debug!(
            url,
            size_bytes,
            content_type = doc.content_type.as_deref().unwrap_or("unknown"),
            "extracting"
        );
        match gist_document::pdf::extract_in_background(url.clone(), doc.bytes, pages).await {
            Ok(extracted) => {
                tracker.advance(&url, DocumentState::Extracted);
                let staged = StagedDocument {
                    extracted,
                    size_bytes,
                    fetched_at,
                };
                if extracted_tx.send(staged).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "extraction failed");
                tracker.advance(&url, DocumentState::Failed);
                let record = FailureRecord {
                    url,
                    error: StageError::from(e),
                    attempts: 1,
                };
                if outcome_tx
                    .send(DocumentOutcome::Failure(record))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn summarize_worker<C: LlmClient + 'static>(
    rx: SharedReceiver<StagedDocument>,
    summarizer: Arc<Summarizer<RateLimitedClient<C>>>,
    tracker: Arc<StateTracker>,
    outcome_tx: mpsc::Sender<DocumentOutcome>,
    stop: watch::Receiver<bool>,
    stop_tx: Arc<watch::Sender<bool>>,
    queue: FetchQueue,
    fatal: Arc<Mutex<Option<FatalError>>>,
) {
    while let Some(staged) = next_item(&rx).await {
        let url = staged.extracted.url.clone();
        if !staged.extracted.is_empty() {
            tracker.advance(&url, DocumentState::Summarizing);
        }
        let outcome = match summarizer.summarize(&staged.extracted, &stop).await {
            Ok(mut result) => {
                result.size_bytes = staged.size_bytes;
                result.fetched_at = Some(staged.fetched_at);
                let terminal = if result.empty {
                    DocumentState::Empty
                } else if result.status == SummaryStatus::Failed {
                    DocumentState::Failed
                } else {
                    DocumentState::Done
                };
                tracker.advance(&url, terminal);
                DocumentOutcome::Summary(result)
            }
            Err(e) => {
                // The run cannot proceed; stop intake, record the fatal
                // error once, and keep draining so every accepted URL
                // still gets its outcome.
                tracing::error!(url, error = %e, "fatal error, aborting run");
                queue.close();
                let _ = stop_tx.send(true);
                let FatalError::Unauthorized { attempts } = &e;
                let attempts = *attempts;
                fatal
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get_or_insert(e);
                tracker.advance(&url, DocumentState::Failed);
                DocumentOutcome::Failure(FailureRecord {
                    url,
                    error: StageError::from(LlmError::Unauthorized),
                    attempts,
                })
            }
        };
        if outcome_tx.send(outcome).await.is_err() {
            return;
        }
    }
}

/// Sole consumer of finished documents: persist, then surface on the
/// result stream. A sink failure is logged and never re-ingested.
async fn collect<S: Sink>(
    mut outcome_rx: mpsc::Receiver<DocumentOutcome>,
    sink: S,
    results_tx: mpsc::Sender<DocumentOutcome>,
) {
    while let Some(outcome) = outcome_rx.recv().await {
        if let Err(e) = sink.write(&outcome).await {
            tracing::error!(url = outcome.url(), error = %e, "sink write failed");
        }
        // A closed result stream means the caller stopped listening; keep
        // draining so the stage workers never stall on a full channel.
        let _ = results_tx.send(outcome).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use gist_document::fixtures::pdf_with_pages;
    use gist_llm::mock::MockClient;

    use crate::error::{SinkError, Stage};
    use crate::sink::MemorySink;

    use super::*;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.fetch.request_timeout_secs = 5;
        config.fetch.max_retries = 1;
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 5;
        config.retry.jitter = 0.0;
        config.summarize.requests_per_second = 1000;
        // Budget of 30 tokens with a 4-token overlap.
        config.chunk.max_tokens = 34;
        config.chunk.token_margin = 4;
        config.chunk.overlap_tokens = 4;
        config
    }

    fn echo_client() -> MockClient {
        MockClient::default().with_responder(|prompt| {
            if prompt.starts_with("Combine") {
                Ok(format!("final:{prompt}"))
            } else {
                Ok(format!("summary:{prompt}"))
            }
        })
    }

    fn idle_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    async fn serve_pdf(server: &MockServer, route: &str, pages: &[Option<&str>]) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(pdf_with_pages(pages)),
            )
            .mount(server)
            .await;
    }

    fn paragraph(words: usize, tag: &str) -> String {
        (0..words)
            .map(|i| format!("{tag}{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[tokio::test]
    async fn drains_multiple_documents_with_one_outcome_each() {
        let server = MockServer::start().await;
        serve_pdf(&server, "/a.pdf", &[Some("alpha report text")]).await;
        serve_pdf(&server, "/b.pdf", &[Some("beta report text")]).await;

        let (_tx, shutdown) = idle_shutdown();
        let sink = MemorySink::default();
        let mut pipeline =
            Pipeline::spawn(&test_config(), echo_client(), sink.clone(), shutdown).unwrap();

        for route in ["/a.pdf", "/b.pdf"] {
            assert!(
                pipeline
                    .enqueue(CandidateUrl::new(format!("{}{route}", server.uri())))
                    .await
            );
        }
        // Duplicate of an accepted URL is rejected at intake.
        assert!(
            !pipeline
                .enqueue(CandidateUrl::new(format!("{}/a.pdf", server.uri())))
                .await
        );
        pipeline.close_intake();

        let mut urls = HashSet::new();
        while let Some(outcome) = pipeline.next_result().await {
            match outcome {
                DocumentOutcome::Summary(s) => {
                    assert_eq!(s.status, SummaryStatus::Success);
                    assert!(s.summary.starts_with("final:"));
                    assert!(urls.insert(s.document_url));
                }
                DocumentOutcome::Failure(f) => panic!("unexpected failure: {}", f.error),
            }
        }
        assert_eq!(urls.len(), 2);

        let report = pipeline.finish().await;
        assert!(report.is_clean());
        assert_eq!(report.accepted, 2);
        assert_eq!(report.counts.done, 2);
        assert_eq!(report.counts.failed, 0);
        assert_eq!(sink.entries().len(), 2);
    }

    #[tokio::test]
    async fn one_failure_never_blocks_the_rest() {
        let server = MockServer::start().await;
        serve_pdf(&server, "/good.pdf", &[Some("fine document")]).await;
        Mock::given(method("GET"))
            .and(path("/gone.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (_tx, shutdown) = idle_shutdown();
        let mut pipeline =
            Pipeline::spawn(&test_config(), echo_client(), MemorySink::default(), shutdown)
                .unwrap();
        for route in ["/gone.pdf", "/good.pdf"] {
            pipeline
                .enqueue(CandidateUrl::new(format!("{}{route}", server.uri())))
                .await;
        }
        pipeline.close_intake();

        let mut succeeded = 0;
        let mut failed = 0;
        while let Some(outcome) = pipeline.next_result().await {
            match outcome {
                DocumentOutcome::Summary(_) => succeeded += 1,
                DocumentOutcome::Failure(f) => {
                    assert_eq!(f.stage(), Stage::Fetch);
                    assert!(f.error.to_string().contains("404"));
                    assert_eq!(f.attempts, 1, "404 is terminal on the first try");
                    failed += 1;
                }
            }
        }
        assert_eq!((succeeded, failed), (1, 1));

        let report = pipeline.finish().await;
        assert!(report.is_clean());
        assert_eq!(report.counts.done, 1);
        assert_eq!(report.counts.failed, 1);
    }

    #[tokio::test]
    async fn non_pdf_and_corrupt_payloads_fail_in_extract() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page.pdf"))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(b"<html>not found</html>".to_vec()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken.pdf"))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 truncated".to_vec()),
            )
            .mount(&server)
            .await;

        let (_tx, shutdown) = idle_shutdown();
        let client = MockClient::default();
        let mut pipeline =
            Pipeline::spawn(&test_config(), client.clone(), MemorySink::default(), shutdown)
                .unwrap();
        for route in ["/page.pdf", "/broken.pdf"] {
            pipeline
                .enqueue(CandidateUrl::new(format!("{}{route}", server.uri())))
                .await;
        }
        pipeline.close_intake();

        let mut failures = 0;
        while let Some(outcome) = pipeline.next_result().await {
            let DocumentOutcome::Failure(f) = outcome else {
                panic!("expected failure");
            };
            assert_eq!(f.stage(), Stage::Extract);
            failures += 1;
        }
        assert_eq!(failures, 2);
        assert_eq!(client.calls(), 0);

        let report = pipeline.finish().await;
        assert_eq!(report.counts.failed, 2);
    }

    #[tokio::test]
    async fn oversized_document_fails_without_reaching_extract() {
        let server = MockServer::start().await;
        serve_pdf(&server, "/huge.pdf", &[Some("weighty tome")]).await;

        let mut config = test_config();
        config.fetch.max_bytes_per_doc = 64;
        let (_tx, shutdown) = idle_shutdown();
        let mut pipeline =
            Pipeline::spawn(&config, echo_client(), MemorySink::default(), shutdown).unwrap();
        pipeline
            .enqueue(CandidateUrl::new(format!("{}/huge.pdf", server.uri())))
            .await;
        pipeline.close_intake();

        let outcome = pipeline.next_result().await.unwrap();
        let DocumentOutcome::Failure(f) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(f.stage(), Stage::Fetch);
        assert!(f.error.to_string().contains("64 bytes"));
        assert!(pipeline.next_result().await.is_none());
        pipeline.finish().await;
    }

    #[tokio::test]
    async fn image_only_pdf_lands_in_empty_without_llm_calls() {
        let server = MockServer::start().await;
        serve_pdf(&server, "/scan.pdf", &[None, None]).await;

        let (_tx, shutdown) = idle_shutdown();
        let client = MockClient::default();
        let mut pipeline =
            Pipeline::spawn(&test_config(), client.clone(), MemorySink::default(), shutdown)
                .unwrap();
        pipeline
            .enqueue(CandidateUrl::new(format!("{}/scan.pdf", server.uri())))
            .await;
        pipeline.close_intake();

        let outcome = pipeline.next_result().await.unwrap();
        let DocumentOutcome::Summary(s) = outcome else {
            panic!("expected summary outcome");
        };
        assert!(s.empty);
        assert_eq!(s.status, SummaryStatus::Success);
        assert!(s.summary.is_empty());
        assert_eq!(s.page_count, 2);
        assert!(
            s.warnings.iter().any(|w| w.contains("no extractable text")),
            "missing text-layer warning: {:?}",
            s.warnings
        );
        assert_eq!(client.calls(), 0);

        let report = pipeline.finish().await;
        assert_eq!(report.counts.empty, 1);
        assert_eq!(report.counts.done, 0);
    }

    /// Three-page PDF with text on the first and last page only, chunked
    /// into exactly two overlapping chunks, summarized by an echo stub.
    #[tokio::test]
    async fn sparse_pdf_end_to_end() {
        let first = paragraph(20, "alpha");
        let third = paragraph(20, "omega");
        let server = MockServer::start().await;
        serve_pdf(
            &server,
            "/report.pdf",
            &[Some(&first), None, Some(&third)],
        )
        .await;

        let (_tx, shutdown) = idle_shutdown();
        let mut pipeline =
            Pipeline::spawn(&test_config(), echo_client(), MemorySink::default(), shutdown)
                .unwrap();
        pipeline
            .enqueue(CandidateUrl::new(format!("{}/report.pdf", server.uri())))
            .await;
        pipeline.close_intake();

        let outcome = pipeline.next_result().await.unwrap();
        let DocumentOutcome::Summary(s) = outcome else {
            panic!("expected summary outcome");
        };
        assert_eq!(s.status, SummaryStatus::Success);
        assert!(s.summary.starts_with("final:"));
        assert_eq!(s.chunk_summaries.len(), 2, "expected exactly two chunks");
        assert!(!s.empty);
        assert_eq!(s.page_count, 3);
        assert!(s.size_bytes > 0, "fetch size lost on the way to the result");
        assert!(s.fetched_at.is_some());
        assert!(s.warnings.is_empty());

        let report = pipeline.finish().await;
        assert!(report.is_clean());
        assert_eq!(report.counts.done, 1);
    }

    #[tokio::test]
    async fn unauthorized_aborts_intake_and_reports_fatal() {
        let server = MockServer::start().await;
        serve_pdf(&server, "/doc.pdf", &[Some("secret contents")]).await;

        let (_tx, shutdown) = idle_shutdown();
        let client = MockClient::default().with_responder(|_| Err(LlmError::Unauthorized));
        let mut pipeline =
            Pipeline::spawn(&test_config(), client, MemorySink::default(), shutdown).unwrap();
        pipeline
            .enqueue(CandidateUrl::new(format!("{}/doc.pdf", server.uri())))
            .await;

        let outcome = pipeline.next_result().await.unwrap();
        let DocumentOutcome::Failure(f) = outcome else {
            panic!("expected failure outcome");
        };
        assert_eq!(f.stage(), Stage::Summarize);
        assert_eq!(f.attempts, 1);

        // Intake was closed by the fatal error.
        assert!(
            !pipeline
                .enqueue(CandidateUrl::new(format!("{}/late.pdf", server.uri())))
                .await
        );

        let report = pipeline.finish().await;
        assert!(matches!(
            report.fatal,
            Some(FatalError::Unauthorized { .. })
        ));
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn sink_failure_leaves_the_result_stream_intact() {
        #[derive(Clone)]
        struct FailingSink;

        impl Sink for FailingSink {
            async fn write(&self, _outcome: &DocumentOutcome) -> Result<(), SinkError> {
                Err(SinkError::WriteFailed("disk full".to_owned()))
            }
        }

        let server = MockServer::start().await;
        serve_pdf(&server, "/doc.pdf", &[Some("persistent text")]).await;

        let (_tx, shutdown) = idle_shutdown();
        let mut pipeline =
            Pipeline::spawn(&test_config(), echo_client(), FailingSink, shutdown).unwrap();
        pipeline
            .enqueue(CandidateUrl::new(format!("{}/doc.pdf", server.uri())))
            .await;
        pipeline.close_intake();

        let outcome = pipeline.next_result().await.unwrap();
        assert!(!outcome.is_failure());

        let report = pipeline.finish().await;
        assert!(report.is_clean());
        assert_eq!(report.counts.done, 1);
    }

    #[tokio::test]
    async fn external_shutdown_closes_intake() {
        let (tx, shutdown) = idle_shutdown();
        let pipeline =
            Pipeline::spawn(&test_config(), MockClient::default(), MemorySink::default(), shutdown)
                .unwrap();

        tx.send(true).unwrap();
        // The relay closes the queue asynchronously.
        tokio::time::timeout(Duration::from_secs(1), async {
            while !pipeline.queue().is_closed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("intake never closed after shutdown");

        assert!(
            !pipeline
                .enqueue(CandidateUrl::new("https://example.com/doc.pdf"))
                .await
        );
        let report = pipeline.finish().await;
        assert!(report.is_clean());
        assert_eq!(report.accepted, 0);
    }

    #[tokio::test]
    async fn finish_without_consuming_results_does_not_deadlock() {
        let server = MockServer::start().await;
        for route in ["/a.pdf", "/b.pdf", "/c.pdf"] {
            serve_pdf(&server, route, &[Some("some text")]).await;
        }

        let (_tx, shutdown) = idle_shutdown();
        let pipeline =
            Pipeline::spawn(&test_config(), echo_client(), MemorySink::default(), shutdown)
                .unwrap();
        for route in ["/a.pdf", "/b.pdf", "/c.pdf"] {
            pipeline
                .enqueue(CandidateUrl::new(format!("{}{route}", server.uri())))
                .await;
        }

        let report = tokio::time::timeout(Duration::from_secs(30), pipeline.finish())
            .await
            .expect("finish stalled");
        assert_eq!(report.accepted, 3);
        assert_eq!(report.counts.done, 3);
    }

    #[tokio::test]
    async fn invalid_chunk_config_is_rejected_at_spawn() {
        let mut config = test_config();
        config.chunk.overlap_tokens = config.chunk.budget();
        let (_tx, shutdown) = idle_shutdown();
        let result = Pipeline::spawn(
            &config,
            MockClient::default(),
            MemorySink::default(),
            shutdown,
        );
        assert!(result.is_err());
    }
}
