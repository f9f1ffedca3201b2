//! Caption retrieval via yt-dlp.

use super::VideoId;
use crate::error::{CramError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// A single caption line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionLine {
    pub text: String,
    pub language: String,
}

/// Ordered caption lines in one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub language: String,
    pub lines: Vec<CaptionLine>,
}

impl Transcript {
    /// Flatten the lines into a single block of text.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a caption lookup. `NotAvailable` is a routing signal, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptOutcome {
    Found(Transcript),
    NotAvailable,
}

/// Trait for caption providers.
#[async_trait]
pub trait SubtitleSource: Send + Sync {
    /// Fetch captions in the first available language of `languages`.
    async fn fetch(&self, id: &VideoId, languages: &[String]) -> TranscriptOutcome;
}

/// How a caption track was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Uploaded by the channel.
    Manual,
    /// Speech recognition in the video's own language.
    Automatic,
}

/// A caption track offered for a video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionTrack {
    /// Language tag used for matching, e.g. `en` for yt-dlp's `en-orig`.
    pub language: String,
    /// Key yt-dlp knows the track by.
    pub code: String,
    pub kind: TrackKind,
}

#[derive(Debug, Default, Deserialize)]
struct TrackFormat {
    #[serde(default)]
    url: Option<String>,
}

impl TrackFormat {
    /// Machine-translated tracks carry a `tlang` query parameter.
    fn is_translated(&self) -> bool {
        self.url
            .as_deref()
            .is_some_and(|url| url.contains("&tlang=") || url.contains("?tlang="))
    }
}

/// Caption listing from `yt-dlp -J`.
#[derive(Debug, Default, Deserialize)]
pub struct VideoInfo {
    #[serde(default)]
    subtitles: BTreeMap<String, Vec<TrackFormat>>,
    #[serde(default)]
    automatic_captions: BTreeMap<String, Vec<TrackFormat>>,
}

impl VideoInfo {
    pub fn from_json(json: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(json)?)
    }

    /// Tracks in the video's own languages, manual ones first.
    ///
    /// Automatic captions that YouTube machine-translates into other
    /// languages are never listed.
    pub fn tracks(&self, include_auto_generated: bool) -> Vec<CaptionTrack> {
        let manual = self
            .subtitles
            .iter()
            .filter(|(code, formats)| code.as_str() != "live_chat" && !formats.is_empty())
            .map(|(code, _)| CaptionTrack {
                language: code.clone(),
                code: code.clone(),
                kind: TrackKind::Manual,
            });

        let automatic = self
            .automatic_captions
            .iter()
            .filter(|_| include_auto_generated)
            .filter(|(_, formats)| formats.iter().any(|f| f.url.is_some() && !f.is_translated()))
            .map(|(code, _)| CaptionTrack {
                language: code.strip_suffix("-orig").unwrap_or(code).to_string(),
                code: code.clone(),
                kind: TrackKind::Automatic,
            });

        manual.chain(automatic).collect()
    }
}

/// Caption provider backed by yt-dlp.
///
/// Lists the available tracks first, picks one, then downloads only that
/// track as WebVTT.
pub struct YtDlpSubtitles {
    binary: PathBuf,
    include_auto_generated: bool,
}

impl YtDlpSubtitles {
    pub fn new(include_auto_generated: bool) -> Self {
        Self {
            binary: PathBuf::from("yt-dlp"),
            include_auto_generated,
        }
    }

    /// Use a specific yt-dlp executable.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Run yt-dlp and return its stdout.
    async fn run(&self, args: &[String]) -> Result<Vec<u8>> {
        let result = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let output = match result {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CramError::ToolNotFound(self.binary.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CramError::InvalidInput(format!(
                "yt-dlp caption lookup failed: {}",
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }

    async fn list_tracks(&self, id: &VideoId) -> Result<Vec<CaptionTrack>> {
        let stdout = self.run(&list_args(id)).await?;
        let info = VideoInfo::from_json(&stdout)?;
        Ok(info.tracks(self.include_auto_generated))
    }

    async fn download_track(&self, id: &VideoId, track: &CaptionTrack, dir: &Path) -> Result<PathBuf> {
        self.run(&download_args(id, track, dir)).await?;

        std::fs::read_dir(dir)?
            .flatten()
            .map(|entry| entry.path())
            .find(|path| {
                path.file_name()
                    .and_then(|name| track_language(&name.to_string_lossy(), id))
                    .is_some_and(|code| code == track.code)
            })
            .ok_or_else(|| CramError::InvalidInput(format!("yt-dlp wrote no {} caption file", track.code)))
    }

    async fn try_fetch(&self, id: &VideoId, languages: &[String]) -> Result<Option<Transcript>> {
        let tracks = self.list_tracks(id).await?;
        debug!("Video offers {} untranslated caption tracks", tracks.len());

        let Some(track) = select_track(&tracks, languages) else {
            return Ok(None);
        };
        debug!(code = %track.code, kind = ?track.kind, "Selected caption track");

        let dir = tempfile::tempdir()?;
        let path = self.download_track(id, track, dir.path()).await?;

        let vtt = tokio::fs::read_to_string(&path).await?;
        let lines = parse_vtt(&vtt, &track.language);
        if lines.is_empty() {
            return Ok(None);
        }

        Ok(Some(Transcript {
            language: track.language.clone(),
            lines,
        }))
    }
}

impl Default for YtDlpSubtitles {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl SubtitleSource for YtDlpSubtitles {
    #[instrument(skip(self, languages), fields(video_id = %id))]
    async fn fetch(&self, id: &VideoId, languages: &[String]) -> TranscriptOutcome {
        match self.try_fetch(id, languages).await {
            Ok(Some(transcript)) => {
                info!(
                    "Found {} captions ({} lines)",
                    transcript.language,
                    transcript.lines.len()
                );
                TranscriptOutcome::Found(transcript)
            }
            Ok(None) => {
                info!("No captions in preferred languages");
                TranscriptOutcome::NotAvailable
            }
            Err(e) => {
                warn!("Caption lookup failed: {}", e);
                TranscriptOutcome::NotAvailable
            }
        }
    }
}

fn list_args(id: &VideoId) -> Vec<String> {
    vec![
        "-J".into(),
        "--skip-download".into(),
        "--no-playlist".into(),
        "--no-warnings".into(),
        id.watch_url(),
    ]
}

fn download_args(id: &VideoId, track: &CaptionTrack, dir: &Path) -> Vec<String> {
    let template = dir.join("%(id)s.%(ext)s");
    let write_flag = match track.kind {
        TrackKind::Manual => "--write-sub",
        TrackKind::Automatic => "--write-auto-sub",
    };

    vec![
        "--skip-download".into(),
        write_flag.into(),
        "--sub-format".into(), "vtt".into(),
        "--sub-langs".into(), track.code.clone(),
        "--output".into(), template.to_string_lossy().to_string(),
        "--no-playlist".into(),
        "--quiet".into(),
        "--no-warnings".into(),
        id.watch_url(),
    ]
}

/// Language tag of a `<id>.<lang>.vtt` file written by yt-dlp.
fn track_language(file_name: &str, id: &VideoId) -> Option<String> {
    let rest = file_name.strip_prefix(id.as_str())?.strip_prefix('.')?;
    let language = rest.strip_suffix(".vtt")?;
    (!language.is_empty()).then(|| language.to_string())
}

fn primary_subtag(tag: &str) -> &str {
    tag.split(['-', '_']).next().unwrap_or(tag)
}

/// Pick the track matching the earliest preferred language.
///
/// Exact tags win over primary-subtag matches (`en` for `en-US`), and for the
/// same language a manual track wins over an automatic one. Tracks in
/// languages outside the preference list are never chosen.
pub fn select_track<'a>(tracks: &'a [CaptionTrack], languages: &[String]) -> Option<&'a CaptionTrack> {
    let exact = languages.iter().find_map(|wanted| {
        tracks
            .iter()
            .find(|track| track.language.eq_ignore_ascii_case(wanted))
    });

    exact.or_else(|| {
        languages.iter().find_map(|wanted| {
            tracks.iter().find(|track| {
                primary_subtag(&track.language).eq_ignore_ascii_case(primary_subtag(wanted))
            })
        })
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag regex"))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Flatten a WebVTT document into caption lines.
///
/// Header, NOTE and STYLE blocks, cue IDs, timing lines and inline tags are
/// dropped. Consecutive duplicates (rolling auto-captions) collapse.
pub fn parse_vtt(vtt: &str, language: &str) -> Vec<CaptionLine> {
    let mut lines: Vec<CaptionLine> = Vec::new();
    let normalized = vtt.replace("\r\n", "\n");

    for block in normalized.split("\n\n") {
        let block_lines: Vec<&str> = block.lines().collect();
        let Some(timing) = block_lines.iter().position(|l| l.contains("-->")) else {
            continue;
        };

        for raw in &block_lines[timing + 1..] {
            let stripped = tag_regex().replace_all(raw, "");
            let text = decode_entities(&stripped)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");

            if text.is_empty() {
                continue;
            }
            if lines.last().is_some_and(|prev| prev.text == text) {
                continue;
            }

            lines.push(CaptionLine {
                text,
                language: language.to_string(),
            });
        }
    }

    lines
}
