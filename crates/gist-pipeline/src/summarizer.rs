//! Map-reduce summarization: parallel per-chunk calls with class-aware
//! retry, drop accounting, and a final reduce pass.

use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;

use gist_document::{Chunker, ExtractedDocument};
use gist_llm::{LlmClient, LlmError};

use crate::config::SummarizeConfig;
use crate::error::FatalError;
use crate::prompts;
use crate::retry::{Backoff, sleep_unless_shutdown};
use crate::state::{SummaryResult, SummaryStatus};

#[derive(Debug, Clone)]
struct RetryPolicy {
    backoff: Backoff,
    max_attempts: u32,
}

/// What a bounded-retry completion call came to.
enum CallOutcome {
    Completed { text: String, attempts: u32 },
    Dropped { attempts: u32 },
    Unauthorized { attempts: u32 },
}

/// Turns one extracted document into a [`SummaryResult`].
///
/// Chunk calls run with bounded parallelism under a shared rate limit; the
/// reduce call is only issued once every chunk has resolved, success or
/// drop. Only credential rejection escapes as an error.
pub struct Summarizer<C> {
    client: Arc<C>,
    chunker: Chunker,
    policy: RetryPolicy,
    drop_threshold: f64,
    chunk_parallelism: usize,
    max_output_tokens: u32,
}

impl<C> std::fmt::Debug for Summarizer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Summarizer")
            .field("policy", &self.policy)
            .field("drop_threshold", &self.drop_threshold)
            .field("chunk_parallelism", &self.chunk_parallelism)
            .finish_non_exhaustive()
    }
}

impl<C: LlmClient + 'static> Summarizer<C> {
    pub fn new(client: Arc<C>, chunker: Chunker, config: &SummarizeConfig, backoff: Backoff) -> Self {
        Self {
            client,
            chunker,
            policy: RetryPolicy {
                backoff,
                max_attempts: config.max_attempts,
            },
            drop_threshold: config.drop_threshold,
            chunk_parallelism: config.chunk_parallelism,
            max_output_tokens: config.max_output_tokens,
        }
    }

    /// Summarize one document. Documents with no text short-circuit to
    /// `Success` with an empty summary and zero LLM calls.
    ///
    /// # Errors
    ///
    /// Only [`FatalError::Unauthorized`]; every other LLM failure is
    /// absorbed into the result's status.
    pub async fn summarize(
        &self,
        document: &ExtractedDocument,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<SummaryResult, FatalError> {
        let chunks = self.chunker.chunk(&document.url, &document.text);
        if chunks.is_empty() {
            tracing::info!(url = %document.url, "nothing to summarize");
            return Ok(SummaryResult {
                document_url: document.url.clone(),
                summary: String::new(),
                chunk_summaries: Vec::new(),
                attempts: 0,
                status: SummaryStatus::Success,
                empty: true,
                warnings: document.warnings.clone(),
                page_count: document.page_count,
                size_bytes: 0,
                fetched_at: None,
            });
        }

        let total = chunks.len();
        tracing::info!(url = %document.url, chunks = total, "summarizing document");

        let semaphore = Arc::new(Semaphore::new(self.chunk_parallelism));
        let mut join = JoinSet::new();
        for chunk in chunks {
            let client = Arc::clone(&self.client);
            let policy = self.policy.clone();
            let semaphore = Arc::clone(&semaphore);
            let shutdown = shutdown.clone();
            let url = document.url.clone();
            let prompt = prompts::chunk_prompt(chunk.index, total, &chunk.text);
            let max_output_tokens = self.max_output_tokens;
            let index = chunk.index;
            join.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = complete_with_retry(
                    &*client,
                    &policy,
                    &url,
                    &format!("chunk {}/{total}", index + 1),
                    &prompt,
                    max_output_tokens,
                    shutdown,
                )
                .await;
                (index, outcome)
            });
        }

        let mut summaries: Vec<Option<String>> = vec![None; total];
        let mut attempts_total = 0u32;
        while let Some(joined) = join.join_next().await {
            let Ok((index, outcome)) = joined else {
                tracing::error!(url = %document.url, "chunk task aborted");
                continue;
            };
            match outcome {
                CallOutcome::Completed { text, attempts } => {
                    attempts_total += attempts;
                    summaries[index] = Some(text);
                }
                CallOutcome::Dropped { attempts } => {
                    attempts_total += attempts;
                    tracing::warn!(url = %document.url, chunk = index, "chunk dropped");
                }
                CallOutcome::Unauthorized { attempts } => {
                    join.abort_all();
                    return Err(FatalError::Unauthorized {
                        attempts: attempts_total + attempts,
                    });
                }
            }
        }

        let chunk_summaries: Vec<String> = summaries.into_iter().flatten().collect();
        let dropped = total - chunk_summaries.len();
        #[allow(clippy::cast_precision_loss)]
        let drop_fraction = dropped as f64 / total as f64;
        if chunk_summaries.is_empty() || drop_fraction > self.drop_threshold {
            tracing::warn!(
                url = %document.url,
                dropped,
                total,
                "too many chunks dropped, not reducing"
            );
            return Ok(SummaryResult {
                document_url: document.url.clone(),
                summary: String::new(),
                chunk_summaries,
                attempts: attempts_total,
                status: SummaryStatus::Failed,
                empty: false,
                warnings: document.warnings.clone(),
                page_count: document.page_count,
                size_bytes: 0,
                fetched_at: None,
            });
        }

        let reduce = complete_with_retry(
            &*self.client,
            &self.policy,
            &document.url,
            "reduce",
            &prompts::reduce_prompt(&chunk_summaries),
            self.max_output_tokens,
            shutdown.clone(),
        )
        .await;
        let (summary, reduce_attempts, status) = match reduce {
            CallOutcome::Completed { text, attempts } => {
                let status = if dropped == 0 {
                    SummaryStatus::Success
                } else {
                    SummaryStatus::PartialSuccess
                };
                (text, attempts, status)
            }
            CallOutcome::Dropped { attempts } => {
                tracing::warn!(
                    url = %document.url,
                    "reduce exhausted retries, falling back to concatenated chunk summaries"
                );
                (
                    chunk_summaries.join("\n\n"),
                    attempts,
                    SummaryStatus::PartialSuccess,
                )
            }
            CallOutcome::Unauthorized { attempts } => {
                return Err(FatalError::Unauthorized {
                    attempts: attempts_total + attempts,
                });
            }
        };
        attempts_total += reduce_attempts;

        Ok(SummaryResult {
            document_url: document.url.clone(),
            summary,
            chunk_summaries,
            attempts: attempts_total,
            status,
            empty: false,
            warnings: document.warnings.clone(),
            page_count: document.page_count,
            size_bytes: 0,
            fetched_at: None,
        })
    }
}

/// One completion with the retry schedule applied. Rate limits, timeouts,
/// and service errors retry up to the attempt bound; a malformed response
/// retries once before the call counts as dropped.
async fn complete_with_retry<C: LlmClient>(
    client: &C,
    policy: &RetryPolicy,
    url: &str,
    label: &str,
    prompt: &str,
    max_output_tokens: u32,
    mut shutdown: watch::Receiver<bool>,
) -> CallOutcome {
    let mut attempts = 0u32;
    let mut invalid = 0u32;
    loop {
        attempts += 1;
        let error = match client.complete(prompt, max_output_tokens).await {
            Ok(text) => return CallOutcome::Completed { text, attempts },
            Err(LlmError::Unauthorized) => return CallOutcome::Unauthorized { attempts },
            Err(e) => e,
        };
        let give_up = match &error {
            LlmError::InvalidResponse(_) => {
                invalid += 1;
                invalid > 1 || attempts >= policy.max_attempts
            }
            _ => attempts >= policy.max_attempts,
        };
        if give_up {
            tracing::warn!(url, label, attempts, error = %error, "giving up on call");
            return CallOutcome::Dropped { attempts };
        }
        let mut delay = policy.backoff.delay(attempts - 1);
        if let Some(hint) = error.retry_after() {
            delay = delay.max(hint);
        }
        tracing::debug!(url, label, attempts, error = %error, ?delay, "retrying call");
        if !sleep_unless_shutdown(delay, &mut shutdown).await {
            return CallOutcome::Dropped { attempts };
        }
    }
}
