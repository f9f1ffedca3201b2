//! Video references.
//!
//! Turns whatever the user pasted (long links, short links, shorts, embeds or
//! a bare ID) into a canonical YouTube video ID, and fetches caption tracks
//! for it.

pub mod subtitles;

pub use subtitles::{
    parse_vtt, select_track, CaptionLine, CaptionTrack, SubtitleSource, TrackKind, Transcript,
    TranscriptOutcome, VideoInfo, YtDlpSubtitles,
};

#[cfg(all(test, unix))]
pub(crate) use subtitles::tests::fake_tool;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use url::Url;

/// Path prefixes that carry the ID as the following segment.
const ID_PATH_PREFIXES: &[&str] = &["shorts", "embed", "v", "live"];

fn bare_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid video id regex"))
}

/// Canonical 11-character video identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// Accept `token` only if it is exactly a well-formed ID.
    pub fn parse(token: &str) -> Option<Self> {
        bare_id_regex()
            .is_match(token)
            .then(|| Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical watch URL, used when handing the video to yt-dlp.
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }
}

impl std::fmt::Display for VideoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve a video reference to its canonical ID.
///
/// Rules apply in a fixed order: absolute URL, scheme-less URL, bare ID.
/// Returns `None` when nothing matches.
pub fn resolve(input: &str) -> Option<VideoId> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(url) = Url::parse(input) {
        if matches!(url.scheme(), "http" | "https") {
            return from_url(&url);
        }
    }

    if looks_like_youtube_host(input) {
        return Url::parse(&format!("https://{}", input))
            .ok()
            .and_then(|url| from_url(&url));
    }

    VideoId::parse(input)
}

/// Whether a host name belongs to YouTube.
pub fn is_youtube_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == "youtu.be"
        || host == "youtube.com"
        || host.ends_with(".youtube.com")
        || host == "youtube-nocookie.com"
        || host.ends_with(".youtube-nocookie.com")
}

fn looks_like_youtube_host(input: &str) -> bool {
    let host = input.split(['/', '?']).next().unwrap_or_default();
    !host.is_empty() && is_youtube_host(host)
}

fn from_url(url: &Url) -> Option<VideoId> {
    let host = url.host_str()?;
    if !is_youtube_host(host) {
        return None;
    }

    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let first = segments.next();

    if host.eq_ignore_ascii_case("youtu.be") {
        return first.and_then(VideoId::parse);
    }

    match first {
        Some("watch") => url
            .query_pairs()
            .find(|(key, _)| key == "v")
            .and_then(|(_, value)| VideoId::parse(value.trim())),
        Some(prefix) if ID_PATH_PREFIXES.contains(&prefix) => {
            segments.next().and_then(VideoId::parse)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "dQw4w9WgXcQ";

    #[test]
    fn test_all_shapes_resolve_to_same_id() {
        let inputs = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ&t=42s",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?si=abcdef",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube-nocookie.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/live/dQw4w9WgXcQ",
            "youtube.com/watch?v=dQw4w9WgXcQ",
            "youtu.be/dQw4w9WgXcQ",
            "dQw4w9WgXcQ",
            "  dQw4w9WgXcQ \n",
        ];

        for input in inputs {
            assert_eq!(
                resolve(input).as_ref().map(VideoId::as_str),
                Some(ID),
                "input: {input}"
            );
        }
    }

    #[test]
    fn test_invalid_inputs() {
        let inputs = [
            "",
            "not-a-video-id",
            "dQw4w9WgXc",
            "https://example.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=short",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQextra",
            "https://www.youtube.com/playlist?list=PLtest",
            "https://www.youtube.com/@channel",
            "Photosynthesis converts light into chemical energy.",
            "ftp://youtu.be/dQw4w9WgXcQ",
        ];

        for input in inputs {
            assert_eq!(resolve(input), None, "input: {input}");
        }
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let url = "https://youtu.be/dQw4w9WgXcQ";
        assert_eq!(resolve(url), resolve(url));
    }

    #[test]
    fn test_watch_url() {
        let id = VideoId::parse(ID).unwrap();
        assert_eq!(id.watch_url(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(id.to_string(), ID);
    }
}
