//! Plain-text extraction from uploaded document bytes.
//!
//! The set of accepted formats is closed: anything outside
//! [`DocumentFormat`] is rejected rather than read as raw text. PDF pages
//! that fail to decode are skipped with a warning; a PDF that cannot be
//! opened at all is an error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to open PDF: {0}")]
    Pdf(String),
}

impl ExtractError {
    /// Text safe to store on the document record and show to its owner.
    pub fn user_message(&self) -> String {
        match self {
            ExtractError::UnsupportedFormat(format) => {
                format!("unsupported file type '{}'", format)
            }
            ExtractError::Pdf(_) => "the PDF could not be opened".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;

/// A document format this crate can turn into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    #[serde(rename = "txt")]
    Text,
    #[serde(rename = "md", alias = "markdown")]
    Markdown,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Text => "txt",
            DocumentFormat::Markdown => "md",
        }
    }

    /// Guesses the format from a file name's extension.
    pub fn from_file_name(name: &str) -> Result<Self> {
        let ext = std::path::Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ExtractError::UnsupportedFormat(name.to_string()))?;
        ext.parse()
    }

    pub fn is_paginated(&self) -> bool {
        matches!(self, DocumentFormat::Pdf)
    }
}

impl FromStr for DocumentFormat {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "txt" => Ok(DocumentFormat::Text),
            "md" | "markdown" => Ok(DocumentFormat::Markdown),
            _ => Err(ExtractError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts gathered from a document for observability.
///
/// Fields that could not be computed are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub file_type: String,
    pub file_size: usize,
    pub character_count: Option<usize>,
    pub word_count: Option<usize>,
    pub line_count: Option<usize>,
    pub page_count: Option<usize>,
}

/// Converts raw bytes of a declared format into plain text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Declared format names accepted by [`extract_declared`](Self::extract_declared).
    pub fn supported_formats() -> &'static [&'static str] {
        &["pdf", "txt", "md", "markdown"]
    }

    pub fn is_supported(declared: &str) -> bool {
        declared.parse::<DocumentFormat>().is_ok()
    }

    /// Parses the declared format name, then extracts.
    pub fn extract_declared(&self, bytes: &[u8], declared: &str) -> Result<String> {
        let format = declared.parse()?;
        self.extract(bytes, format)
    }

    pub fn extract(&self, bytes: &[u8], format: DocumentFormat) -> Result<String> {
        match format {
            DocumentFormat::Pdf => extract_pdf(bytes).map(|(text, _)| text),
            DocumentFormat::Text | DocumentFormat::Markdown => Ok(decode_utf8(bytes)),
        }
    }

    /// Extracts text and gathers size and count statistics in one pass.
    pub fn extract_with_stats(&self, bytes: &[u8], format: DocumentFormat) -> Result<(String, ExtractionStats)> {
        let mut stats = ExtractionStats {
            file_type: format.as_str().to_string(),
            file_size: bytes.len(),
            ..Default::default()
        };

        let text = match format {
            DocumentFormat::Pdf => {
                let (text, pages) = extract_pdf(bytes)?;
                stats.page_count = Some(pages);
                text
            }
            DocumentFormat::Text | DocumentFormat::Markdown => decode_utf8(bytes),
        };

        stats.character_count = Some(text.chars().count());
        stats.word_count = Some(text.split_whitespace().count());
        stats.line_count = Some(text.split('\n').count());
        Ok((text, stats))
    }

    /// Collects size and count statistics. Never fails: anything that
    /// cannot be measured is left unset and logged.
    pub fn extract_metadata(&self, bytes: &[u8], format: DocumentFormat) -> ExtractionStats {
        match self.extract_with_stats(bytes, format) {
            Ok((_, stats)) => stats,
            Err(e) => {
                warn!(error = %e, format = %format, "Could not gather document statistics");
                ExtractionStats {
                    file_type: format.as_str().to_string(),
                    file_size: bytes.len(),
                    ..Default::default()
                }
            }
        }
    }
}

fn decode_utf8(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) => {
            warn!(valid_up_to = e.valid_up_to(), "Document is not valid UTF-8, replacing invalid bytes");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Returns the joined page text and the document's page count.
fn extract_pdf(bytes: &[u8]) -> Result<(String, usize)> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;

    let mut pages: Vec<u32> = doc.get_pages().keys().cloned().collect();
    pages.sort_unstable();

    let mut texts = Vec::with_capacity(pages.len());
    for page in &pages {
        match doc.extract_text(&[*page]) {
            Ok(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    texts.push(text.to_string());
                }
            }
            Err(e) => {
                warn!(page = *page, error = %e, "Skipping PDF page that failed to extract");
            }
        }
    }

    debug!(pages = pages.len(), extracted = texts.len(), "PDF extraction finished");
    Ok((texts.join("\n\n").trim().to_string(), pages.len()))
}


#[cfg(test)]
mod tests {
    use super::test_pdf::{multipage_pdf, pdf_with_pages};
    use super::*;

    #[test]
    fn test_format_parsing_is_case_insensitive() {
        assert_eq!("PDF".parse::<DocumentFormat>().unwrap(), DocumentFormat::Pdf);
        assert_eq!("Markdown".parse::<DocumentFormat>().unwrap(), DocumentFormat::Markdown);
        assert_eq!(".txt".parse::<DocumentFormat>().unwrap(), DocumentFormat::Text);
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let extractor = TextExtractor::new();
        let err = extractor.extract_declared(b"hello", "docx").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(ref f) if f == "docx"));
        assert!(!TextExtractor::is_supported("html"));
    }

    #[test]
    fn test_supported_formats_all_parse() {
        for name in TextExtractor::supported_formats() {
            assert!(TextExtractor::is_supported(name), "{} should parse", name);
        }
    }

    #[test]
    fn test_format_from_file_name() {
        assert_eq!(DocumentFormat::from_file_name("labs/2024.PDF").unwrap(), DocumentFormat::Pdf);
        assert!(DocumentFormat::from_file_name("README").is_err());
    }

    #[test]
    fn test_plain_text_passthrough() {
        let extractor = TextExtractor::new();
        let text = extractor.extract(b"# Results\nAll normal.", DocumentFormat::Markdown).unwrap();
        assert_eq!(text, "# Results\nAll normal.");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let extractor = TextExtractor::new();
        let text = extractor.extract(&[b'o', b'k', 0xff], DocumentFormat::Text).unwrap();
        assert!(text.starts_with("ok"));
    }

    #[test]
    fn test_corrupt_pdf_is_fatal() {
        let extractor = TextExtractor::new();
        let err = extractor.extract(b"not a pdf", DocumentFormat::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
        assert_eq!(err.user_message(), "the PDF could not be opened");
    }

    #[test]
    fn test_pdf_pages_are_joined() {
        let pdf = multipage_pdf(&["Cholesterol", "Glucose"]);
        let extractor = TextExtractor::new();
        let text = extractor.extract(&pdf, DocumentFormat::Pdf).unwrap();
        assert!(text.contains("Cholesterol"), "got: {}", text);
        assert!(text.contains("Glucose"), "got: {}", text);
        assert!(text.find("Cholesterol") < text.find("Glucose"));
    }

    #[test]
    fn test_broken_page_is_skipped() {
        let pdf = pdf_with_pages(&[Some("Cholesterol"), None, Some("Glucose")]);
        let extractor = TextExtractor::new();

        let (text, stats) = extractor.extract_with_stats(&pdf, DocumentFormat::Pdf).unwrap();
        assert!(text.contains("Cholesterol"), "got: {}", text);
        assert!(text.contains("Glucose"), "got: {}", text);
        assert_eq!(stats.page_count, Some(3));

        let stats = extractor.extract_metadata(&pdf, DocumentFormat::Pdf);
        assert_eq!(stats.page_count, Some(3));
        assert!(stats.character_count.unwrap() > 0);
    }

    #[test]
    fn test_metadata_for_text() {
        let extractor = TextExtractor::new();
        let stats = extractor.extract_metadata(b"one two\nthree", DocumentFormat::Text);
        assert_eq!(stats.file_type, "txt");
        assert_eq!(stats.file_size, 13);
        assert_eq!(stats.character_count, Some(13));
        assert_eq!(stats.word_count, Some(3));
        assert_eq!(stats.line_count, Some(2));
        assert_eq!(stats.page_count, None);
    }

    #[test]
    fn test_metadata_for_pdf_counts_pages() {
        let pdf = multipage_pdf(&["a", "b", "c"]);
        let stats = TextExtractor::new().extract_metadata(&pdf, DocumentFormat::Pdf);
        assert_eq!(stats.page_count, Some(3));
    }

    #[test]
    fn test_metadata_never_fails_on_bad_pdf() {
        let stats = TextExtractor::new().extract_metadata(b"garbage", DocumentFormat::Pdf);
        assert_eq!(stats.file_size, 7);
        assert_eq!(stats.page_count, None);
        assert_eq!(stats.character_count, None);
    }
}
