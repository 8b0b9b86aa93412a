//! LLM completion capability: client trait, OpenAI-compatible backend, scripted mock.

pub mod client;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod openai;

pub use client::LlmClient;
pub use error::{LlmError, Result};
