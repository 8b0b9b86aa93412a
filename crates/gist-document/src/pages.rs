use std::fmt;
use std::str::FromStr;

use crate::error::ExtractionError;

/// Page selection: every page, or an inclusive-start/exclusive-end window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRange {
    All,
    Pages { start: usize, end: usize },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PageRangeError {
    #[error("invalid page range `{0}` (expected `all` or `START..END`)")]
    Parse(String),

    #[error("page range start {start} must be below end {end}")]
    Bounds { start: usize, end: usize },
}

impl PageRange {
    /// Build an explicit window.
    ///
    /// # Errors
    ///
    /// Returns [`PageRangeError::Bounds`] when `start >= end`.
    pub fn pages(start: usize, end: usize) -> Result<Self, PageRangeError> {
        if start >= end {
            return Err(PageRangeError::Bounds { start, end });
        }
        Ok(Self::Pages { start, end })
    }

    /// Concrete `[start, end)` slice of a document with `page_count` pages.
    ///
    /// `end` is clamped to `page_count`; an out-of-range `start` is an error,
    /// never a silent empty selection.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::InvalidRange`] when `start >= page_count`.
    pub fn resolve(self, page_count: usize) -> Result<(usize, usize), ExtractionError> {
        match self {
            Self::All => Ok((0, page_count)),
            Self::Pages { start, end } => {
                if start >= page_count {
                    return Err(ExtractionError::InvalidRange { start, page_count });
                }
                Ok((start, end.min(page_count).max(start)))
            }
        }
    }

    #[must_use]
    pub fn is_all(self) -> bool {
        matches!(self, Self::All)
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Pages { start, end } => write!(f, "{start}..{end}"),
        }
    }
}

impl FromStr for PageRange {
    type Err = PageRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        let (start, end) = trimmed
            .split_once("..")
            .ok_or_else(|| PageRangeError::Parse(s.to_owned()))?;
        let start = start
            .trim()
            .parse::<usize>()
            .map_err(|_| PageRangeError::Parse(s.to_owned()))?;
        let end = end
            .trim()
            .parse::<usize>()
            .map_err(|_| PageRangeError::Parse(s.to_owned()))?;
        Self::pages(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_case_insensitive() {
        assert_eq!("all".parse::<PageRange>().unwrap(), PageRange::All);
        assert_eq!("ALL".parse::<PageRange>().unwrap(), PageRange::All);
        assert_eq!(" all ".parse::<PageRange>().unwrap(), PageRange::All);
    }

    #[test]
    fn parses_explicit_window() {
        assert_eq!(
            "2..10".parse::<PageRange>().unwrap(),
            PageRange::Pages { start: 2, end: 10 }
        );
        assert_eq!(
            "0..1".parse::<PageRange>().unwrap(),
            PageRange::Pages { start: 0, end: 1 }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            "pages".parse::<PageRange>(),
            Err(PageRangeError::Parse(_))
        ));
        assert!(matches!(
            "1..x".parse::<PageRange>(),
            Err(PageRangeError::Parse(_))
        ));
        assert!(matches!(
            "-1..2".parse::<PageRange>(),
            Err(PageRangeError::Parse(_))
        ));
    }

    #[test]
    fn rejects_inverted_window() {
        assert_eq!(
            "5..5".parse::<PageRange>(),
            Err(PageRangeError::Bounds { start: 5, end: 5 })
        );
        assert_eq!(
            PageRange::pages(7, 3),
            Err(PageRangeError::Bounds { start: 7, end: 3 })
        );
    }

    #[test]
    fn resolve_all_covers_document() {
        assert_eq!(PageRange::All.resolve(3).unwrap(), (0, 3));
        assert_eq!(PageRange::All.resolve(0).unwrap(), (0, 0));
    }

    #[test]
    fn resolve_clamps_end() {
        let range = PageRange::pages(1, 100).unwrap();
        assert_eq!(range.resolve(3).unwrap(), (1, 3));
    }

    #[test]
    fn resolve_rejects_out_of_range_start() {
        let range = PageRange::pages(5, 9).unwrap();
        assert!(matches!(
            range.resolve(3),
            Err(ExtractionError::InvalidRange {
                start: 5,
                page_count: 3
            })
        ));
    }

    #[test]
    fn display_round_trips() {
        assert_eq!(PageRange::All.to_string(), "all");
        assert_eq!(PageRange::pages(2, 4).unwrap().to_string(), "2..4");
        let parsed = "2..4".parse::<PageRange>().unwrap();
        assert_eq!(parsed.to_string().parse::<PageRange>().unwrap(), parsed);
    }
}
