//! Document handling: type sniffing and PDF text extraction.

use crate::error::{CramError, Result};
use lopdf::Document;
use std::path::Path;
use tracing::{debug, info, instrument};

/// Kind of an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    /// Image with its MIME type.
    Image(String),
}

impl DocumentKind {
    /// Classify a file by magic bytes, then by extension.
    pub fn sniff(bytes: &[u8], file_name: Option<&Path>) -> Option<Self> {
        if bytes.starts_with(b"%PDF-") {
            return Some(DocumentKind::Pdf);
        }
        if let Some(mime) = image_mime_from_magic(bytes) {
            return Some(DocumentKind::Image(mime.to_string()));
        }

        let ext = file_name
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())?;

        match ext.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "png" => Some(DocumentKind::Image("image/png".into())),
            "jpg" | "jpeg" => Some(DocumentKind::Image("image/jpeg".into())),
            "gif" => Some(DocumentKind::Image("image/gif".into())),
            "webp" => Some(DocumentKind::Image("image/webp".into())),
            "heic" => Some(DocumentKind::Image("image/heic".into())),
            _ => None,
        }
    }
}

fn image_mime_from_magic(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" && matches!(&bytes[8..12], b"heic" | b"heix" | b"mif1") {
        Some("image/heic")
    } else {
        None
    }
}

/// Outcome of text extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentText {
    Text {
        text: String,
        pages_read: usize,
        total_pages: usize,
    },
    /// No page yielded text; the document is most likely scanned images.
    ImageOnly,
}

/// Extract text from at most the first `max_pages` pages of a PDF.
///
/// Pages that fail to extract or come back blank are skipped. Documents
/// encrypted with only an owner password are opened with the empty user
/// password; unreadable or password-protected ones are `ExtractionCorrupt`.
#[instrument(skip(bytes), fields(size = bytes.len()))]
pub fn extract_text(bytes: &[u8], max_pages: usize) -> Result<DocumentText> {
    let mut doc = Document::load_mem(bytes).map_err(|e| CramError::ExtractionCorrupt(e.to_string()))?;

    if doc.is_encrypted() {
        doc.decrypt("").map_err(|e| {
            CramError::ExtractionCorrupt(format!("document is password protected: {}", e))
        })?;
        debug!("Opened encrypted document with the empty user password");
    }

    let pages = doc.get_pages();
    let total_pages = pages.len();
    let mut pages_read = 0;
    let mut parts: Vec<String> = Vec::new();

    for &page_number in pages.keys().take(max_pages) {
        pages_read += 1;
        match doc.extract_text(&[page_number]) {
            Ok(text) if !text.trim().is_empty() => parts.push(text.trim().to_string()),
            Ok(_) => debug!("Page {} has no text", page_number),
            Err(e) => debug!("Skipping page {}: {}", page_number, e),
        }
    }

    if parts.is_empty() {
        info!("No text in first {} of {} pages", pages_read, total_pages);
        return Ok(DocumentText::ImageOnly);
    }

    info!("Extracted text from {} of {} pages", parts.len(), total_pages);

    Ok(DocumentText::Text {
        text: parts.join("\n\n"),
        pages_read,
        total_pages,
    })
}
