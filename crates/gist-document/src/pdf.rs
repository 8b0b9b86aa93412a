//! PDF text extraction on top of `pdf-extract`.

use crate::error::{ExtractionError, Result};
use crate::pages::PageRange;
use crate::text::clean_page;

/// How far into the payload the `%PDF-` marker may sit. Real-world files
/// sometimes carry junk bytes before the header.
const PDF_MAGIC_WINDOW: usize = 1024;

pub const NO_TEXT_LAYER_WARNING: &str = "no extractable text layer";

/// Text pulled out of one document, plus enough metadata to audit what was
/// actually read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub url: String,
    pub text: String,
    pub page_count: usize,
    /// The range that was actually extracted after clamping.
    pub extracted_pages: PageRange,
    pub warnings: Vec<String>,
}

impl ExtractedDocument {
    /// True when the document parsed but produced no text, e.g. a scan
    /// without an OCR layer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

fn looks_like_pdf(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(PDF_MAGIC_WINDOW)];
    window.windows(5).any(|w| w == b"%PDF-")
}

/// Extract the text of `range` from an in-memory PDF.
///
/// Page text is cleaned page by page and joined with blank lines so the
/// chunker sees page breaks as paragraph breaks. Pages with no text are
/// skipped; a document where every selected page is blank comes back with
/// empty text and a warning rather than an error.
///
/// # Errors
///
/// [`ExtractionError::Unsupported`] when the payload has no PDF header,
/// [`ExtractionError::Corrupt`] when parsing fails, and
/// [`ExtractionError::InvalidRange`] when the range starts past the last
/// page.
pub fn extract(url: &str, bytes: &[u8], range: PageRange) -> Result<ExtractedDocument> {
    if !looks_like_pdf(bytes) {
        return Err(ExtractionError::Unsupported);
    }

    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractionError::Corrupt(e.to_string()))?;
    let page_count = pages.len();
    let (start, end) = range.resolve(page_count)?;

    let mut warnings = Vec::new();
    if let PageRange::Pages { end: wanted, .. } = range
        && wanted > page_count
    {
        warnings.push(format!("page range clamped to {page_count} pages"));
    }

    let cleaned: Vec<String> = pages[start..end]
        .iter()
        .map(|page| clean_page(page))
        .filter(|page| !page.is_empty())
        .collect();
    let text = cleaned.join("\n\n");

    if text.is_empty() {
        tracing::warn!(url, page_count, "{NO_TEXT_LAYER_WARNING}");
        warnings.push(NO_TEXT_LAYER_WARNING.to_owned());
    }

    let extracted_pages = match range {
        PageRange::All => PageRange::All,
        PageRange::Pages { start, .. } => PageRange::Pages { start, end },
    };

    Ok(ExtractedDocument {
        url: url.to_owned(),
        text,
        page_count,
        extracted_pages,
        warnings,
    })
}

/// Run [`extract`] on the blocking pool; PDF parsing is CPU-bound and can
/// take seconds for large documents.
///
/// # Errors
///
/// Everything [`extract`] returns, plus [`ExtractionError::Corrupt`] when
/// the parser panics on malformed input.
pub async fn extract_in_background(
    url: String,
    bytes: Vec<u8>,
    range: PageRange,
) -> Result<ExtractedDocument> {
    let handle = tokio::task::spawn_blocking(move || extract(&url, &bytes, range));
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(ExtractionError::Corrupt(format!(
            "extraction task failed: {e}"
        ))),
    }
}
