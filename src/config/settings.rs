//! Configuration settings for Cram.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default character budget for text sent to a model.
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 30_000;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub models: ModelSettings,
    pub subtitles: SubtitleSettings,
    pub audio: AudioSettings,
    pub document: DocumentSettings,
    pub content: ContentSettings,
    pub prompts: PromptSettings,
    pub tools: ToolSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory holding per-run scratch directories.
    pub temp_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            temp_dir: "/tmp/cram".to_string(),
            log_level: "warn".to_string(),
        }
    }
}

/// Model backend provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    /// Google Gemini REST API (accepts images, audio and PDFs inline).
    #[default]
    Gemini,
    /// OpenAI chat completions.
    OpenAI,
}

impl ModelProvider {
    /// Environment variable conventionally holding this provider's key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ModelProvider::Gemini => "GEMINI_API_KEY",
            ModelProvider::OpenAI => "OPENAI_API_KEY",
        }
    }

    /// Fallback chain used when the config does not name one.
    pub fn default_candidates(&self) -> Vec<String> {
        let models: &[&str] = match self {
            ModelProvider::Gemini => &["gemini-2.5-flash", "gemini-2.5-flash-lite", "gemini-2.0-flash"],
            ModelProvider::OpenAI => &["gpt-4o-mini", "gpt-4o", "gpt-4.1-mini"],
        };
        models.iter().map(|m| m.to_string()).collect()
    }
}

impl std::str::FromStr for ModelProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" | "google" => Ok(ModelProvider::Gemini),
            "openai" => Ok(ModelProvider::OpenAI),
            _ => Err(format!("Unknown model provider: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelProvider::Gemini => write!(f, "gemini"),
            ModelProvider::OpenAI => write!(f, "openai"),
        }
    }
}

/// Model backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelSettings {
    /// Backend provider (gemini, openai).
    pub provider: ModelProvider,
    /// Ordered model candidates. Empty = provider defaults.
    pub candidates: Vec<String>,
    /// API key. Prefer the environment variable over storing it here.
    pub api_key: Option<String>,
    /// Override for the provider's API base URL.
    pub base_url: Option<String>,
    /// Request timeout in seconds (0 = client default of 300).
    pub timeout_seconds: u64,
    /// Speech-to-text model used by the OpenAI backend for audio payloads.
    pub transcription_model: Option<String>,
}

impl ModelSettings {
    /// Candidates in the order they will be tried.
    pub fn candidate_list(&self) -> Vec<String> {
        let configured: Vec<String> = self
            .candidates
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        if configured.is_empty() {
            self.provider.default_candidates()
        } else {
            configured
        }
    }
}

/// Subtitle retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleSettings {
    /// Preferred caption languages, most preferred first.
    pub languages: Vec<String>,
    /// Also accept automatically generated captions.
    pub include_auto_generated: bool,
}

impl Default for SubtitleSettings {
    fn default() -> Self {
        Self {
            languages: ["ko", "en", "en-US", "en-GB", "ja"]
                .iter()
                .map(|l| l.to_string())
                .collect(),
            include_auto_generated: true,
        }
    }
}

/// Audio download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Target MP3 bitrate passed to yt-dlp.
    pub bitrate: String,
    /// User-agent strings to rotate between attempts. Empty = built-in pool.
    pub user_agents: Vec<String>,
    /// Referers to rotate between attempts. Empty = built-in pool.
    pub referers: Vec<String>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            bitrate: "64K".to_string(),
            user_agents: Vec::new(),
            referers: Vec::new(),
        }
    }
}

/// Document extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSettings {
    /// Maximum number of leading pages to read.
    pub max_pages: usize,
    /// Send image-only PDFs to the model as attachments instead of failing.
    pub vision_fallback: bool,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            max_pages: 10,
            vision_fallback: false,
        }
    }
}

/// Content normalization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentSettings {
    /// Character budget for text payloads.
    pub max_chars: usize,
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CONTENT_CHARS,
        }
    }
}

/// External tool locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolSettings {
    /// yt-dlp executable, looked up on PATH unless a path is given.
    pub yt_dlp: String,
    /// ffmpeg executable used to convert downloaded audio.
    pub ffmpeg: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            yt_dlp: "yt-dlp".to_string(),
            ffmpeg: "ffmpeg".to_string(),
        }
    }
}

impl ToolSettings {
    /// yt-dlp path with `~` expanded.
    pub fn yt_dlp_path(&self) -> PathBuf {
        Settings::expand_path(&self.yt_dlp)
    }

    /// ffmpeg path with `~` expanded.
    pub fn ffmpeg_path(&self) -> PathBuf {
        Settings::expand_path(&self.ffmpeg)
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::CramError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cram")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded temp directory path.
    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }

    /// Resolve the API key: explicit override, then config file, then the
    /// provider's environment variable. Blank values count as absent.
    pub fn resolve_api_key(&self, cli_override: Option<&str>) -> Option<String> {
        let non_blank = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };

        cli_override
            .and_then(non_blank)
            .or_else(|| self.models.api_key.as_deref().and_then(non_blank))
            .or_else(|| {
                std::env::var(self.models.provider.api_key_env())
                    .ok()
                    .as_deref()
                    .and_then(non_blank)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.models.provider, ModelProvider::Gemini);
        assert_eq!(settings.content.max_chars, 30_000);
        assert_eq!(settings.document.max_pages, 10);
        assert_eq!(settings.subtitles.languages[0], "ko");
        assert_eq!(settings.models.candidate_list().len(), 3);
    }

    #[test]
    fn test_partial_toml() {
        let settings: Settings = toml::from_str(
            r#"
            [models]
            provider = "openai"
            candidates = ["gpt-4o", "  ", "gpt-4o-mini"]

            [document]
            max_pages = 15

            [tools]
            yt_dlp = "~/bin/yt-dlp"
            "#,
        )
        .unwrap();

        assert_eq!(settings.models.provider, ModelProvider::OpenAI);
        assert_eq!(settings.models.candidate_list(), vec!["gpt-4o", "gpt-4o-mini"]);
        assert_eq!(settings.document.max_pages, 15);
        assert!(!settings.document.vision_fallback);
        assert_eq!(settings.audio.bitrate, "64K");
        assert!(settings.tools.yt_dlp_path().ends_with("bin/yt-dlp"));
        assert_eq!(settings.tools.ffmpeg, "ffmpeg");
    }

    #[test]
    fn test_api_key_override_wins() {
        let mut settings = Settings::default();
        settings.models.api_key = Some("from-config".to_string());

        assert_eq!(settings.resolve_api_key(Some("from-flag")).as_deref(), Some("from-flag"));
        assert_eq!(settings.resolve_api_key(Some("   ")).as_deref(), Some("from-config"));
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("Gemini".parse::<ModelProvider>(), Ok(ModelProvider::Gemini));
        assert_eq!("openai".parse::<ModelProvider>(), Ok(ModelProvider::OpenAI));
        assert!("claude".parse::<ModelProvider>().is_err());
    }
}
