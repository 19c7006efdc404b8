//! # Deterministic Page Extraction
//!
//! Converts stored document bytes into an ordered sequence of page records.
//! Re-running on identical bytes with the same parser version produces
//! byte-identical page text; the parser version is stamped on every page so
//! a future parser upgrade can re-extract forward-compatibly.
//!
//! Non-text pages yield empty text with `char_count = 0` — they are never
//! omitted, so page numbering always matches the source document.

use thiserror::Error;

/// Parser version stamped on pages extracted from PDF documents.
pub const PDF_PARSER_VERSION: &str = "pdf-lopdf-v1";

/// Parser version stamped on pages extracted from plain text documents.
pub const TEXT_PARSER_VERSION: &str = "text-formfeed-v1";

/// One extracted page of a document.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExtractedPage {
    /// 1-based page number.
    pub page_number: u32,
    /// Extracted text; empty for non-text pages.
    pub text: String,
    /// Character count of `text`.
    pub char_count: usize,
    /// Version tag of the parser that produced this page.
    pub parser_version: String,
}

/// Extraction failures.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The declared content type has no registered parser.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The bytes do not parse as the declared content type.
    #[error("malformed {content_type} document: {reason}")]
    Malformed {
        /// Declared content type of the document.
        content_type: String,
        /// Parser failure detail.
        reason: String,
    },
}

/// Extract ordered page records from document bytes.
///
/// Supported content types:
/// - `application/pdf` — one record per PDF page, in page order.
/// - `text/plain` — form feeds (`\f`) delimit pages; a document without form
///   feeds is a single page.
///
/// Any other content type fails with [`ExtractError::UnsupportedFormat`].
pub fn extract_pages(bytes: &[u8], content_type: &str) -> Result<Vec<ExtractedPage>, ExtractError> {
    match normalize_content_type(content_type).as_str() {
        "application/pdf" => extract_pdf_pages(bytes),
        "text/plain" => Ok(extract_text_pages(bytes)),
        other => Err(ExtractError::UnsupportedFormat(other.to_string())),
    }
}

/// Strip parameters (`; charset=utf-8`) and lowercase the media type.
fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<ExtractedPage>, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Malformed {
        content_type: "application/pdf".to_string(),
        reason: e.to_string(),
    })?;

    let mut pages = Vec::new();
    // get_pages() returns a BTreeMap keyed by 1-based page number, so the
    // iteration order is the document's page order.
    for (&page_number, _object_id) in doc.get_pages().iter() {
        // A page whose content streams carry no text (images, vector art)
        // yields an empty record rather than being dropped.
        let text = doc.extract_text(&[page_number]).unwrap_or_default();
        let text = normalize_extracted_text(&text);
        pages.push(ExtractedPage {
            page_number,
            char_count: text.chars().count(),
            text,
            parser_version: PDF_PARSER_VERSION.to_string(),
        });
    }

    if pages.is_empty() {
        return Err(ExtractError::Malformed {
            content_type: "application/pdf".to_string(),
            reason: "document has no pages".to_string(),
        });
    }
    Ok(pages)
}

/// Normalize line endings so extraction is platform-independent.
fn normalize_extracted_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn extract_text_pages(bytes: &[u8]) -> Vec<ExtractedPage> {
    let text = String::from_utf8_lossy(bytes);
    let text = normalize_extracted_text(&text);
    text.split('\u{000C}')
        .enumerate()
        .map(|(idx, page_text)| ExtractedPage {
            page_number: (idx + 1) as u32,
            char_count: page_text.chars().count(),
            text: page_text.to_string(),
            parser_version: TEXT_PARSER_VERSION.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_single_page() {
        let pages = extract_pages(b"hello disclosure", "text/plain").unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[0].text, "hello disclosure");
        assert_eq!(pages[0].char_count, 16);
        assert_eq!(pages[0].parser_version, TEXT_PARSER_VERSION);
    }

    #[test]
    fn form_feed_delimits_pages() {
        let pages = extract_pages(b"page one\x0cpage two\x0cpage three", "text/plain").unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].text, "page one");
        assert_eq!(pages[1].text, "page two");
        assert_eq!(pages[2].text, "page three");
        assert_eq!(pages[2].page_number, 3);
    }

    #[test]
    fn empty_page_is_kept_not_omitted() {
        let pages = extract_pages(b"first\x0c\x0cthird", "text/plain").unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[1].text, "");
        assert_eq!(pages[1].char_count, 0);
        assert_eq!(pages[1].page_number, 2);
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        let pages = extract_pages(b"x", "text/plain; charset=utf-8").unwrap();
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn unsupported_content_type_is_rejected() {
        match extract_pages(b"<html/>", "text/html") {
            Err(ExtractError::UnsupportedFormat(ct)) => assert_eq!(ct, "text/html"),
            other => panic!("expected UnsupportedFormat, got {other:?}"),
        }
    }

    #[test]
    fn malformed_pdf_is_rejected() {
        match extract_pages(b"definitely not a pdf", "application/pdf") {
            Err(ExtractError::Malformed { content_type, .. }) => {
                assert_eq!(content_type, "application/pdf");
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn extraction_is_deterministic() {
        let bytes = b"alpha\x0cbeta";
        let a = extract_pages(bytes, "text/plain").unwrap();
        let b = extract_pages(bytes, "text/plain").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn windows_line_endings_normalized() {
        let pages = extract_pages(b"line one\r\nline two", "text/plain").unwrap();
        assert_eq!(pages[0].text, "line one\nline two");
    }
}
