//! Audio download via yt-dlp.
//!
//! The track is written as MP3 into the current run's scratch directory. Each
//! attempt presents a randomly chosen client identity to make origin-side
//! blocking less likely; blocking can still happen and is reported verbatim.

use crate::config::AudioSettings;
use crate::error::{CramError, Result};
use async_trait::async_trait;
use rand::prelude::IndexedRandom;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// File stem of the audio artifact inside a run's scratch directory.
pub const AUDIO_FILE_STEM: &str = "audio";

const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1",
];

const DEFAULT_REFERERS: &[&str] = &[
    "https://www.youtube.com/",
    "https://www.google.com/",
    "https://m.youtube.com/",
];

/// An MP3 file owned by the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    pub path: PathBuf,
    pub codec: &'static str,
}

impl AudioArtifact {
    pub fn mime_type(&self) -> &'static str {
        "audio/mp3"
    }
}

/// Client identity presented to the origin on one download attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    pub user_agent: String,
    pub referer: String,
}

/// Fixed pool of identities to draw from.
#[derive(Debug, Clone)]
pub struct IdentityPool {
    user_agents: Vec<String>,
    referers: Vec<String>,
}

impl IdentityPool {
    /// Build a pool from settings, falling back to the built-in lists.
    pub fn from_settings(settings: &AudioSettings) -> Self {
        let or_default = |configured: &[String], defaults: &[&str]| {
            if configured.is_empty() {
                defaults.iter().map(|s| s.to_string()).collect()
            } else {
                configured.to_vec()
            }
        };

        Self {
            user_agents: or_default(&settings.user_agents, DEFAULT_USER_AGENTS),
            referers: or_default(&settings.referers, DEFAULT_REFERERS),
        }
    }

    /// Draw a random identity.
    pub fn pick(&self) -> RequestIdentity {
        let mut rng = rand::rng();
        RequestIdentity {
            user_agent: self
                .user_agents
                .choose(&mut rng)
                .cloned()
                .unwrap_or_else(|| DEFAULT_USER_AGENTS[0].to_string()),
            referer: self
                .referers
                .choose(&mut rng)
                .cloned()
                .unwrap_or_else(|| DEFAULT_REFERERS[0].to_string()),
        }
    }
}

impl Default for IdentityPool {
    fn default() -> Self {
        Self::from_settings(&AudioSettings::default())
    }
}

/// Trait for audio acquisition strategies.
#[async_trait]
pub trait AudioAcquirer: Send + Sync {
    /// Download the audio track of `url` into `scratch_dir`.
    async fn acquire(&self, url: &str, scratch_dir: &Path) -> Result<AudioArtifact>;
}

/// yt-dlp based audio downloader.
pub struct YtDlpAudio {
    bitrate: String,
    identities: IdentityPool,
    yt_dlp: PathBuf,
    ffmpeg: PathBuf,
}

impl YtDlpAudio {
    pub fn new(settings: &AudioSettings) -> Self {
        Self {
            bitrate: settings.bitrate.clone(),
            identities: IdentityPool::from_settings(settings),
            yt_dlp: PathBuf::from("yt-dlp"),
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }

    /// Use specific yt-dlp and ffmpeg executables.
    pub fn with_binaries(mut self, yt_dlp: impl Into<PathBuf>, ffmpeg: impl Into<PathBuf>) -> Self {
        self.yt_dlp = yt_dlp.into();
        self.ffmpeg = ffmpeg.into();
        self
    }

    /// The MP3 conversion needs ffmpeg; check it before downloading anything.
    async fn ensure_ffmpeg(&self) -> Result<()> {
        let name = self.ffmpeg.display().to_string();
        let result = Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match result {
            Ok(status) if status.success() => Ok(()),
            Ok(_) => Err(CramError::ToolNotFound(format!(
                "{} is installed but not working correctly",
                name
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CramError::ToolNotFound(name)),
            Err(e) => Err(CramError::ToolNotFound(format!("{}: {}", name, e))),
        }
    }

    /// yt-dlp arguments for one attempt.
    fn build_args(&self, url: &str, scratch_dir: &Path, identity: &RequestIdentity) -> Vec<String> {
        let template = scratch_dir.join(format!("{}.%(ext)s", AUDIO_FILE_STEM));

        let mut args: Vec<String> = vec![
            "--format".into(), "bestaudio/best".into(),
            "--extract-audio".into(),
            "--audio-format".into(), "mp3".into(),
            "--audio-quality".into(), self.bitrate.clone(),
            "--user-agent".into(), identity.user_agent.clone(),
            "--referer".into(), identity.referer.clone(),
            "--add-header".into(), "Accept-Language:ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7".into(),
            "--output".into(), template.to_string_lossy().to_string(),
            "--no-playlist".into(),
            "--quiet".into(),
            "--no-warnings".into(),
        ];

        // A bare name is left to yt-dlp's own PATH lookup.
        if self.ffmpeg.components().count() > 1 {
            args.push("--ffmpeg-location".into());
            args.push(self.ffmpeg.to_string_lossy().to_string());
        }

        args.push(url.to_string());
        args
    }
}

impl Default for YtDlpAudio {
    fn default() -> Self {
        Self::new(&AudioSettings::default())
    }
}

#[async_trait]
impl AudioAcquirer for YtDlpAudio {
    #[instrument(skip(self, scratch_dir), fields(url = %url))]
    async fn acquire(&self, url: &str, scratch_dir: &Path) -> Result<AudioArtifact> {
        std::fs::create_dir_all(scratch_dir)?;
        self.ensure_ffmpeg().await?;

        let identity = self.identities.pick();
        debug!(user_agent = %identity.user_agent, referer = %identity.referer, "Using request identity");
        info!("Downloading audio");

        let result = Command::new(&self.yt_dlp)
            .args(self.build_args(url, scratch_dir, &identity))
            .kill_on_drop(true)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        let output = match result {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CramError::ToolNotFound(self.yt_dlp.display().to_string()));
            }
            Err(e) => {
                return Err(CramError::AcquisitionBlocked(format!("yt-dlp execution failed: {e}")));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CramError::AcquisitionBlocked(stderr.trim().to_string()));
        }

        let path = find_audio_file(scratch_dir)?;
        info!("Audio saved to {}", path.display());

        Ok(AudioArtifact { path, codec: "mp3" })
    }
}

/// Locates the converted MP3 in the scratch directory.
fn find_audio_file(dir: &Path) -> Result<PathBuf> {
    let candidate = dir.join(format!("{}.mp3", AUDIO_FILE_STEM));
    if candidate.exists() {
        return Ok(candidate);
    }

    // Post-processing failed part way: report what yt-dlp left behind
    let leftovers: Vec<String> = std::fs::read_dir(dir)?
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(AUDIO_FILE_STEM))
        .collect();

    Err(CramError::AcquisitionBlocked(format!(
        "audio track was not converted to mp3 (found: {})",
        if leftovers.is_empty() { "nothing".to_string() } else { leftovers.join(", ") }
    )))
}
