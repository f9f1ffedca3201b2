//! Chooses an acquisition strategy for each request and builds the payload.

use super::{
    Attachment, AttachmentKind, ContentRequest, ContentSource, NormalizedPayload, PayloadContent,
};
use crate::audio::AudioAcquirer;
use crate::config::{DocumentSettings, Prompts, SubtitleSettings, DEFAULT_MAX_CONTENT_CHARS};
use crate::document::{self, DocumentKind, DocumentText};
use crate::error::{CramError, Result};
use crate::video::{self, SubtitleSource, TranscriptOutcome};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Normalization parameters, fixed for the lifetime of a pipeline.
#[derive(Debug, Clone)]
pub struct ContentConfig {
    /// Instruction template with a `{{content}}` slot.
    pub template: String,
    /// Stands in for `{{content}}` when sending an attachment.
    /// `{{attachment_kind}}` is replaced with the attachment's kind.
    pub attachment_note: String,
    pub max_chars: usize,
    pub max_pages: usize,
    pub languages: Vec<String>,
    pub vision_fallback: bool,
}

impl Default for ContentConfig {
    fn default() -> Self {
        let prompts = Prompts::default();
        let document = DocumentSettings::default();
        Self {
            template: prompts.study.template,
            attachment_note: prompts.study.attachment_note,
            max_chars: DEFAULT_MAX_CONTENT_CHARS,
            max_pages: document.max_pages,
            languages: SubtitleSettings::default().languages,
            vision_fallback: document.vision_fallback,
        }
    }
}

/// Keep the first `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Turns a [`ContentRequest`] into a [`NormalizedPayload`].
pub struct Normalizer {
    config: ContentConfig,
    subtitles: Arc<dyn SubtitleSource>,
    audio: Arc<dyn AudioAcquirer>,
}

impl Normalizer {
    pub fn new(
        config: ContentConfig,
        subtitles: Arc<dyn SubtitleSource>,
        audio: Arc<dyn AudioAcquirer>,
    ) -> Self {
        Self {
            config,
            subtitles,
            audio,
        }
    }

    /// Normalize a request. Audio artifacts are written into `scratch_dir`.
    #[instrument(skip(self, request, scratch_dir), fields(kind = request.label()))]
    pub async fn normalize(&self, request: ContentRequest, scratch_dir: &Path) -> Result<NormalizedPayload> {
        match request {
            ContentRequest::RawText(text) => {
                if text.trim().is_empty() {
                    return Err(CramError::InvalidInput("there is no text to analyze".into()));
                }
                Ok(self.text_payload(&text, ContentSource::Text))
            }

            ContentRequest::Document { bytes, kind: DocumentKind::Pdf } => self.normalize_pdf(bytes),

            ContentRequest::Document { bytes, kind: DocumentKind::Image(mime_type) } => {
                Ok(self.attachment_payload(
                    Attachment { kind: AttachmentKind::Image, mime_type, bytes },
                    ContentSource::Image,
                ))
            }

            ContentRequest::VideoReference(reference) => self.normalize_video(&reference, scratch_dir).await,
        }
    }

    fn normalize_pdf(&self, bytes: Vec<u8>) -> Result<NormalizedPayload> {
        match document::extract_text(&bytes, self.config.max_pages)? {
            DocumentText::Text { text, pages_read, total_pages } => Ok(self.text_payload(
                &text,
                ContentSource::Document { pages_read, total_pages },
            )),
            DocumentText::ImageOnly if self.config.vision_fallback => {
                info!("PDF has no text layer, sending it as an attachment");
                Ok(self.attachment_payload(
                    Attachment {
                        kind: AttachmentKind::Pdf,
                        mime_type: "application/pdf".into(),
                        bytes,
                    },
                    ContentSource::ScannedDocument,
                ))
            }
            DocumentText::ImageOnly => Err(CramError::ExtractionEmpty),
        }
    }

    async fn normalize_video(&self, reference: &str, scratch_dir: &Path) -> Result<NormalizedPayload> {
        let id = video::resolve(reference)
            .ok_or_else(|| CramError::InvalidReference(reference.trim().to_string()))?;

        match self.subtitles.fetch(&id, &self.config.languages).await {
            TranscriptOutcome::Found(transcript) => {
                info!("Using {} captions", transcript.language);
                Ok(self.text_payload(
                    &transcript.text(),
                    ContentSource::Subtitles {
                        video_id: id.to_string(),
                        language: transcript.language.clone(),
                    },
                ))
            }
            TranscriptOutcome::NotAvailable => {
                info!("No usable captions, falling back to audio");
                let artifact = self.audio.acquire(&id.watch_url(), scratch_dir).await?;
                let bytes = tokio::fs::read(&artifact.path).await?;

                Ok(self.attachment_payload(
                    Attachment {
                        kind: AttachmentKind::Audio,
                        mime_type: artifact.mime_type().to_string(),
                        bytes,
                    },
                    ContentSource::Audio { video_id: id.to_string() },
                ))
            }
        }
    }

    fn text_payload(&self, text: &str, source: ContentSource) -> NormalizedPayload {
        let kept = truncate_chars(text, self.config.max_chars);
        let truncated = kept.len() < text.len();
        if truncated {
            warn!(
                "Content truncated to the first {} characters",
                self.config.max_chars
            );
        }

        NormalizedPayload {
            template: self.config.template.clone(),
            content: PayloadContent::Text(kept.to_string()),
            source,
            truncated,
        }
    }

    fn attachment_payload(&self, attachment: Attachment, source: ContentSource) -> NormalizedPayload {
        let mut vars = HashMap::new();
        vars.insert("attachment_kind".to_string(), attachment.kind.to_string());
        let note = Prompts::render(&self.config.attachment_note, &vars);

        NormalizedPayload {
            template: self.config.template.clone(),
            content: PayloadContent::Attachment { attachment, note },
            source,
            truncated: false,
        }
    }
}
