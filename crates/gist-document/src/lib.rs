//! PDF text extraction and chunking for model-sized input.

pub mod chunker;
pub mod error;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
pub mod pages;
pub mod pdf;
pub mod text;

pub use chunker::{Chunk, Chunker};
pub use error::ExtractionError;
pub use pages::PageRange;
pub use pdf::ExtractedDocument;
