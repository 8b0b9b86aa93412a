//! Ingestion-and-summarization pipeline: deduplicated URL intake, bounded
//! concurrent fetch, PDF extraction, map-reduce LLM summarization, and
//! JSON persistence.

pub mod config;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod prompts;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod sink;
pub mod state;
pub mod summarizer;

pub use config::Config;
pub use error::{FatalError, FetchError, FetchFailure, SinkError, Stage, StageError};
pub use pipeline::{Pipeline, RunReport};
pub use queue::{CandidateUrl, FetchQueue};
pub use rate_limit::RateLimitedClient;
pub use retry::Backoff;
pub use sink::{JsonDirSink, MemorySink, Sink};
pub use state::{
    DocumentOutcome, DocumentState, FailureRecord, StateCounts, SummaryResult, SummaryStatus,
};
pub use summarizer::Summarizer;
