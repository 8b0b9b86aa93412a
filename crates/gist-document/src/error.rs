#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("corrupt PDF: {0}")]
    Corrupt(String),

    #[error("page range starts at {start} but the document has {page_count} pages")]
    InvalidRange { start: usize, page_count: usize },

    #[error("not a PDF document")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, ExtractionError>;
