//! Pipeline for Cram.
//!
//! Coordinates one run from raw study material to a study report:
//! credential check, scratch setup, normalization, model dispatch, cleanup.

use crate::audio::{AudioAcquirer, YtDlpAudio};
use crate::config::{
    DocumentSettings, ModelProvider, Prompts, Settings, ToolSettings, DEFAULT_MAX_CONTENT_CHARS,
};
use crate::content::{ContentConfig, ContentRequest, ContentSource, Normalizer};
use crate::error::{CramError, Result};
use crate::llm::{create_backend, DispatchOutcome, Dispatcher, ModelBackend};
use crate::report::{StudyGuide, StudyReport};
use crate::scratch::ScratchArea;
use crate::video::{SubtitleSource, YtDlpSubtitles};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Everything a pipeline needs, resolved once from settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// API key for the model backend. `None` fails every run up front.
    pub credential: Option<String>,
    pub provider: ModelProvider,
    /// Model identifiers in the order they are tried.
    pub candidates: Vec<String>,
    pub content: ContentConfig,
    /// Directory holding per-run scratch directories.
    pub scratch_root: PathBuf,
    pub tools: ToolSettings,
}

impl PipelineConfig {
    /// Build from settings. `api_key_override` takes precedence over the
    /// configured and environment credentials.
    pub fn from_settings(settings: &Settings, api_key_override: Option<&str>) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let max_chars = match settings.content.max_chars {
            0 => DEFAULT_MAX_CONTENT_CHARS,
            n => n,
        };
        let max_pages = match settings.document.max_pages {
            0 => DocumentSettings::default().max_pages,
            n => n,
        };

        Ok(Self {
            credential: settings.resolve_api_key(api_key_override),
            provider: settings.models.provider,
            candidates: settings.models.candidate_list(),
            content: ContentConfig {
                template: prompts.study_template(),
                attachment_note: prompts.study.attachment_note.clone(),
                max_chars,
                max_pages,
                languages: settings.subtitles.languages.clone(),
                vision_fallback: settings.document.vision_fallback,
            },
            scratch_root: settings.temp_dir(),
            tools: settings.tools.clone(),
        })
    }
}

/// The main pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    normalizer: Normalizer,
    dispatcher: Dispatcher,
    scratch: ScratchArea,
}

impl Pipeline {
    /// Create a pipeline with the yt-dlp sources and the configured backend.
    pub fn from_settings(settings: &Settings, api_key_override: Option<&str>) -> Result<Self> {
        let config = PipelineConfig::from_settings(settings, api_key_override)?;

        // Without a key the backend is never called; run() rejects first.
        let backend = create_backend(
            &settings.models,
            config.credential.as_deref().unwrap_or_default(),
            config.content.max_chars,
        )?;
        let subtitles = Arc::new(
            YtDlpSubtitles::new(settings.subtitles.include_auto_generated)
                .with_binary(config.tools.yt_dlp_path()),
        );
        let audio = Arc::new(
            YtDlpAudio::new(&settings.audio)
                .with_binaries(config.tools.yt_dlp_path(), config.tools.ffmpeg_path()),
        );

        info!(
            "Using {} with candidates [{}]",
            config.provider,
            config.candidates.join(", ")
        );

        Self::with_components(config, subtitles, audio, backend)
    }

    /// Create a pipeline with custom components.
    pub fn with_components(
        config: PipelineConfig,
        subtitles: Arc<dyn SubtitleSource>,
        audio: Arc<dyn AudioAcquirer>,
        backend: Arc<dyn ModelBackend>,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::new(backend, config.candidates.clone())?;
        let normalizer = Normalizer::new(config.content.clone(), subtitles, audio);
        let scratch = ScratchArea::new(&config.scratch_root);

        Ok(Self {
            config,
            normalizer,
            dispatcher,
            scratch,
        })
    }

    /// Replace the scratch area, e.g. to change its staleness threshold.
    pub fn with_scratch(mut self, scratch: ScratchArea) -> Self {
        self.scratch = scratch;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process one request into a study report.
    pub async fn run(&self, request: ContentRequest) -> Result<StudyReport> {
        if self.config.credential.is_none() {
            return Err(CramError::MissingCredential(self.config.provider.to_string()));
        }

        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("run", run_id = %run_id, kind = request.label());
        self.run_with_scratch(run_id, request).instrument(span).await
    }

    async fn run_with_scratch(&self, run_id: String, request: ContentRequest) -> Result<StudyReport> {
        if let Err(e) = self.scratch.sweep_stale() {
            warn!("Failed to sweep stale scratch directories: {}", e);
        }

        let run_scratch = self.scratch.begin_run()?;
        let result = self.acquire_and_dispatch(request, run_scratch.path()).await;

        if let Err(e) = run_scratch.close() {
            warn!("Failed to remove run scratch directory: {}", e);
        }

        let (source, normalized_truncated, outcome) = result?;
        let truncated = normalized_truncated || outcome.input_truncated;
        info!(
            "Answer from {} after {} failed attempts",
            outcome.model,
            outcome.failed_attempts.len()
        );

        Ok(StudyReport {
            run_id,
            guide: StudyGuide::parse(&outcome.text),
            model: outcome.model,
            source,
            truncated,
            response: outcome.text,
            generated_at: Utc::now(),
            attempts_failed: outcome.failed_attempts,
        })
    }

    async fn acquire_and_dispatch(
        &self,
        request: ContentRequest,
        scratch_dir: &Path,
    ) -> Result<(ContentSource, bool, DispatchOutcome)> {
        let payload = self.normalizer.normalize(request, scratch_dir).await?;
        info!("Normalized {} into a payload", payload.source);

        let outcome = self.dispatcher.dispatch(&payload).await?;
        Ok((payload.source, payload.truncated, outcome))
    }
}
