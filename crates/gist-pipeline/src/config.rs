//! Run configuration: TOML file, env overrides, validation.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub chunk: ChunkConfig,
    #[serde(default)]
    pub summarize: SummarizeConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_max_bytes_per_doc() -> u64 {
    50 * 1024 * 1024
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_queue_capacity() -> usize {
    64
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_bytes_per_doc")]
    pub max_bytes_per_doc: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_fetch_concurrency(),
            max_bytes_per_doc: default_max_bytes_per_doc(),
            request_timeout_secs: default_fetch_timeout_secs(),
            max_retries: default_max_retries(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl FetchConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_extract_concurrency() -> usize {
    2
}

fn default_pages() -> String {
    "all".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ExtractConfig {
    #[serde(default = "default_extract_concurrency")]
    pub concurrency: usize,
    /// Page selection: "all" or "start..end" (zero-based, end exclusive).
    #[serde(default = "default_pages")]
    pub pages: String,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            concurrency: default_extract_concurrency(),
            pages: default_pages(),
        }
    }
}

fn default_max_tokens() -> usize {
    2000
}

fn default_overlap_tokens() -> usize {
    200
}

fn default_token_margin() -> usize {
    256
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ChunkConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    /// Safety margin subtracted from `max_tokens` to absorb token-estimate
    /// drift against the provider's real tokenizer.
    #[serde(default = "default_token_margin")]
    pub token_margin: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
            token_margin: default_token_margin(),
        }
    }
}

impl ChunkConfig {
    /// Chunk budget actually handed to the chunker.
    #[must_use]
    pub fn budget(&self) -> usize {
        self.max_tokens.saturating_sub(self.token_margin)
    }
}

fn default_summarize_concurrency() -> usize {
    2
}

fn default_chunk_parallelism() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_drop_threshold() -> f64 {
    0.5
}

fn default_max_output_tokens() -> u32 {
    1024
}

fn default_summarize_timeout_secs() -> u64 {
    60
}

fn default_requests_per_second() -> u32 {
    2
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SummarizeConfig {
    #[serde(default = "default_summarize_concurrency")]
    pub concurrency: usize,
    /// Parallel chunk calls within one document.
    #[serde(default = "default_chunk_parallelism")]
    pub chunk_parallelism: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Document fails when more than this fraction of chunks is dropped.
    #[serde(default = "default_drop_threshold")]
    pub drop_threshold: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_summarize_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            concurrency: default_summarize_concurrency(),
            chunk_parallelism: default_chunk_parallelism(),
            max_attempts: default_max_attempts(),
            drop_threshold: default_drop_threshold(),
            max_output_tokens: default_max_output_tokens(),
            request_timeout_secs: default_summarize_timeout_secs(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

impl SummarizeConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

#[derive(Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: String::new(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fractional jitter applied to each delay, in `[0, 1)`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn default_output_dir() -> String {
    "summaries".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting configuration fails validation.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GIST_API_KEY") {
            self.llm.api_key = v;
        }
        if let Ok(v) = std::env::var("GIST_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("GIST_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("GIST_OUTPUT_DIR") {
            self.output.dir = v;
        }
    }

    /// Reject configurations the pipeline cannot run with. These are fatal
    /// before any URL is consumed, never degraded per document.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fetch.concurrency == 0 {
            bail!("fetch.concurrency must be at least 1");
        }
        if self.fetch.queue_capacity == 0 {
            bail!("fetch.queue_capacity must be at least 1");
        }
        if self.fetch.max_bytes_per_doc == 0 {
            bail!("fetch.max_bytes_per_doc must be at least 1");
        }
        if self.extract.concurrency == 0 {
            bail!("extract.concurrency must be at least 1");
        }
        self.extract
            .pages
            .parse::<gist_document::PageRange>()
            .map_err(|e| anyhow::anyhow!("extract.pages: {e}"))?;
        if self.chunk.token_margin >= self.chunk.max_tokens {
            bail!(
                "chunk.token_margin ({}) must be below chunk.max_tokens ({})",
                self.chunk.token_margin,
                self.chunk.max_tokens
            );
        }
        if self.chunk.overlap_tokens >= self.chunk.budget() {
            bail!(
                "chunk.overlap_tokens ({}) must be below the effective chunk budget ({})",
                self.chunk.overlap_tokens,
                self.chunk.budget()
            );
        }
        if self.summarize.concurrency == 0 {
            bail!("summarize.concurrency must be at least 1");
        }
        if self.summarize.chunk_parallelism == 0 {
            bail!("summarize.chunk_parallelism must be at least 1");
        }
        if self.summarize.max_attempts == 0 {
            bail!("summarize.max_attempts must be at least 1");
        }
        if !(self.summarize.drop_threshold > 0.0 && self.summarize.drop_threshold <= 1.0) {
            bail!("summarize.drop_threshold must be within (0, 1]");
        }
        if self.summarize.requests_per_second == 0 {
            bail!("summarize.requests_per_second must be at least 1");
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            bail!("retry.jitter must be within [0, 1)");
        }
        Ok(())
    }
}
