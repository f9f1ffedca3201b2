//! Content normalization.
//!
//! Every kind of study material ends up as a [`NormalizedPayload`]: the
//! instruction template plus either text or a binary attachment.

mod normalizer;

pub use normalizer::{truncate_chars, ContentConfig, Normalizer};

#[cfg(test)]
pub(crate) use normalizer::tests::{FakeAudio, FakeSubtitles};

use crate::document::DocumentKind;
use serde::Serialize;

/// Study material as submitted by the user.
#[derive(Debug, Clone)]
pub enum ContentRequest {
    RawText(String),
    Document { bytes: Vec<u8>, kind: DocumentKind },
    VideoReference(String),
}

impl ContentRequest {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ContentRequest::RawText(_) => "text",
            ContentRequest::Document { kind: DocumentKind::Pdf, .. } => "pdf",
            ContentRequest::Document { kind: DocumentKind::Image(_), .. } => "image",
            ContentRequest::VideoReference(_) => "video",
        }
    }
}

/// What an attachment contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Audio,
    Pdf,
}

impl std::fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachmentKind::Image => write!(f, "image"),
            AttachmentKind::Audio => write!(f, "audio recording"),
            AttachmentKind::Pdf => write!(f, "PDF document"),
        }
    }
}

/// Binary content sent alongside the prompt.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("kind", &self.kind)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Where the payload content came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentSource {
    Text,
    Document { pages_read: usize, total_pages: usize },
    ScannedDocument,
    Image,
    Subtitles { video_id: String, language: String },
    Audio { video_id: String },
}

impl std::fmt::Display for ContentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentSource::Text => write!(f, "pasted text"),
            ContentSource::Document { pages_read, total_pages } => {
                write!(f, "PDF text ({} of {} pages)", pages_read, total_pages)
            }
            ContentSource::ScannedDocument => write!(f, "scanned PDF"),
            ContentSource::Image => write!(f, "image"),
            ContentSource::Subtitles { video_id, language } => {
                write!(f, "{} captions of {}", language, video_id)
            }
            ContentSource::Audio { video_id } => write!(f, "audio track of {}", video_id),
        }
    }
}

/// Body of a payload: text or an attachment with a note standing in for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadContent {
    Text(String),
    Attachment { attachment: Attachment, note: String },
}

/// Everything the dispatcher needs to send one request.
#[derive(Debug, Clone)]
pub struct NormalizedPayload {
    /// Instruction template with a `{{content}}` slot.
    pub template: String,
    pub content: PayloadContent,
    pub source: ContentSource,
    /// Whether text was cut to the character budget.
    pub truncated: bool,
}

const CONTENT_SLOT: &str = "{{content}}";

impl NormalizedPayload {
    /// Full prompt text with the content slot filled.
    pub fn prompt(&self) -> String {
        let body = match &self.content {
            PayloadContent::Text(text) => text.as_str(),
            PayloadContent::Attachment { note, .. } => note.as_str(),
        };

        if self.template.contains(CONTENT_SLOT) {
            self.template.replace(CONTENT_SLOT, body)
        } else {
            format!("{}\n\n{}", self.template, body)
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            PayloadContent::Text(text) => Some(text),
            PayloadContent::Attachment { .. } => None,
        }
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        match &self.content {
            PayloadContent::Text(_) => None,
            PayloadContent::Attachment { attachment, .. } => Some(attachment),
        }
    }
}
