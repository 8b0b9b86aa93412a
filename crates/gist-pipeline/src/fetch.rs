//! Document download: streaming size cap, transient-error retry, 429
//! handling with retry-after.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use tokio::sync::watch;

use crate::error::{FetchError, FetchFailure};
use crate::retry::{Backoff, sleep_unless_shutdown};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A successfully downloaded document. Dropped as soon as extraction has
/// consumed the bytes.
#[derive(Clone)]
pub struct FetchedDocument {
    pub url: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub size_bytes: u64,
    pub fetched_at: DateTime<Utc>,
}

impl std::fmt::Debug for FetchedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedDocument")
            .field("url", &self.url)
            .field("size_bytes", &self.size_bytes)
            .field("content_type", &self.content_type)
            .field("fetched_at", &self.fetched_at)
            .finish_non_exhaustive()
    }
}

struct AttemptError {
    error: FetchError,
    retry_after: Option<Duration>,
}

impl From<FetchError> for AttemptError {
    fn from(error: FetchError) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }
}

/// Downloads documents with a hard byte cap enforced while the body
/// streams in, so an oversized document never buffers past the limit.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    max_bytes: u64,
    max_retries: u32,
    backoff: Backoff,
}

impl Fetcher {
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized.
    #[must_use]
    pub fn new(timeout: Duration, max_bytes: u64, max_retries: u32, backoff: Backoff) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .user_agent(concat!("gist/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .expect("HTTP client construction must not fail");
        Self {
            client,
            max_bytes,
            max_retries,
            backoff,
        }
    }

    /// Download `url`, retrying transient failures up to the configured
    /// bound. A 429 waits at least the server's retry-after hint; other
    /// 4xx statuses and the byte cap are terminal.
    ///
    /// # Errors
    ///
    /// Returns the last [`FetchError`] and the tries consumed once retries
    /// are exhausted, the error is terminal, or shutdown interrupts the
    /// backoff wait.
    pub async fn fetch(
        &self,
        url: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<FetchedDocument, FetchFailure> {
        let mut attempt = 0u32;
        loop {
            let failed = match self.try_fetch(url).await {
                Ok(doc) => {
                    tracing::debug!(url, size_bytes = doc.size_bytes, "fetched");
                    return Ok(doc);
                }
                Err(failed) => failed,
            };
            if !failed.error.is_transient() || attempt >= self.max_retries {
                return Err(FetchFailure {
                    error: failed.error,
                    attempts: attempt + 1,
                });
            }
            let mut delay = self.backoff.delay(attempt);
            if let Some(hint) = failed.retry_after {
                delay = delay.max(hint);
            }
            tracing::warn!(
                url,
                attempt = attempt + 1,
                error = %failed.error,
                ?delay,
                "retrying fetch"
            );
            if !sleep_unless_shutdown(delay, shutdown).await {
                return Err(FetchFailure {
                    error: failed.error,
                    attempts: attempt + 1,
                });
            }
            attempt += 1;
        }
    }

    async fn try_fetch(&self, url: &str) -> Result<FetchedDocument, AttemptError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AttemptError::from(classify_transport(&e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptError {
                error: FetchError::HttpStatus(status.as_u16()),
                retry_after: retry_after_hint(&response),
            });
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()).into());
        }
        if let Some(declared) = response.content_length()
            && declared > self.max_bytes
        {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            }
            .into());
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AttemptError::from(classify_transport(&e)))?
        {
            if bytes.len() as u64 + chunk.len() as u64 > self.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_bytes,
                }
                .into());
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchedDocument {
            url: url.to_owned(),
            size_bytes: bytes.len() as u64,
            bytes,
            content_type,
            fetched_at: Utc::now(),
        })
    }
}

fn classify_transport(e: &reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::ConnReset
    }
}

fn retry_after_hint(response: &reqwest::Response) -> Option<Duration> {
    let seconds = response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()?;
    Some(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fetcher(max_bytes: u64, max_retries: u32) -> Fetcher {
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(5), 0.0);
        Fetcher::new(Duration::from_secs(5), max_bytes, max_retries, backoff)
    }

    fn idle_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn downloads_body_and_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(b"%PDF-1.4 payload".to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (_tx, mut shutdown) = idle_shutdown();
        let doc = fetcher(1024, 3)
            .fetch(&format!("{}/doc.pdf", server.uri()), &mut shutdown)
            .await
            .unwrap();
        assert_eq!(doc.bytes, b"%PDF-1.4 payload");
        assert_eq!(doc.size_bytes, 16);
        assert_eq!(doc.content_type.as_deref(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn not_found_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let (_tx, mut shutdown) = idle_shutdown();
        let err = fetcher(1024, 3)
            .fetch(&format!("{}/missing.pdf", server.uri()), &mut shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err.error, FetchError::HttpStatus(404)));
        assert_eq!(err.attempts, 1);
    }

    #[tokio::test]
    async fn server_error_retries_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let (_tx, mut shutdown) = idle_shutdown();
        let doc = fetcher(1024, 3)
            .fetch(&format!("{}/flaky.pdf", server.uri()), &mut shutdown)
            .await
            .unwrap();
        assert_eq!(doc.bytes, b"ok");
    }

    #[tokio::test]
    async fn exhausted_retries_surface_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let (_tx, mut shutdown) = idle_shutdown();
        let err = fetcher(1024, 2)
            .fetch(&format!("{}/down.pdf", server.uri()), &mut shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err.error, FetchError::HttpStatus(500)));
        assert_eq!(err.attempts, 3);
    }

    #[tokio::test]
    async fn rate_limit_waits_out_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"late".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let (_tx, mut shutdown) = idle_shutdown();
        let doc = fetcher(1024, 3)
            .fetch(&format!("{}/limited.pdf", server.uri()), &mut shutdown)
            .await
            .unwrap();
        assert_eq!(doc.bytes, b"late");
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn oversized_body_aborts_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .expect(1)
            .mount(&server)
            .await;

        let (_tx, mut shutdown) = idle_shutdown();
        let err = fetcher(64, 3)
            .fetch(&format!("{}/huge.pdf", server.uri()), &mut shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err.error, FetchError::TooLarge { limit: 64 }));
        assert_eq!(err.attempts, 1);
    }

    #[tokio::test]
    async fn connection_refused_classifies_as_reset() {
        let (_tx, mut shutdown) = idle_shutdown();
        let err = fetcher(1024, 0)
            .fetch("http://127.0.0.1:1/doc.pdf", &mut shutdown)
            .await
            .unwrap_err();
        assert!(matches!(
            err.error,
            FetchError::ConnReset | FetchError::Timeout
        ));
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_backoff_wait() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(60), 0.0);
        let fetcher = Fetcher::new(Duration::from_secs(5), 1024, 5, backoff);
        let (tx, mut shutdown) = watch::channel(false);
        tx.send(true).unwrap();

        let started = std::time::Instant::now();
        let err = fetcher
            .fetch(&format!("{}/slow.pdf", server.uri()), &mut shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err.error, FetchError::HttpStatus(500)));
        assert_eq!(err.attempts, 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
