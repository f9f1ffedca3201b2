//! Pre-flight checks before expensive operations.
//!
//! Validates the credential, the video reference and yt-dlp before a run
//! starts, so a video analysis fails up front instead of after the caption
//! lookup. ffmpeg is only needed for the audio fallback and is checked when
//! that fallback runs.

use crate::content::ContentRequest;
use crate::error::{CramError, Result};
use crate::pipeline::PipelineConfig;
use crate::video;
use std::path::Path;
use std::process::Command;

/// Check what the request will need: a credential, and for videos a
/// resolvable reference and yt-dlp.
pub fn check(config: &PipelineConfig, request: &ContentRequest) -> Result<()> {
    if config.credential.is_none() {
        return Err(CramError::MissingCredential(config.provider.to_string()));
    }

    if let ContentRequest::VideoReference(reference) = request {
        if video::resolve(reference).is_none() {
            return Err(CramError::InvalidReference(reference.trim().to_string()));
        }
        check_tool(&config.tools.yt_dlp_path())?;
    }
    Ok(())
}

/// Check if an external tool is available.
pub(crate) fn check_tool(program: &Path) -> Result<()> {
    let name = program.display().to_string();
    // ffmpeg uses -version (single dash), others use --version
    let version_arg = match program.file_stem().and_then(|s| s.to_str()) {
        Some("ffmpeg") => "-version",
        _ => "--version",
    };
    match Command::new(program).arg(version_arg).output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(_) => Err(CramError::ToolNotFound(format!(
            "{} is installed but not working correctly",
            name
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(CramError::ToolNotFound(name.to_string()))
        }
        Err(e) => Err(CramError::ToolNotFound(format!("{}: {}", name, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelProvider, ToolSettings};
    use crate::content::ContentConfig;

    fn config(credential: Option<&str>, tools: ToolSettings) -> PipelineConfig {
        PipelineConfig {
            credential: credential.map(str::to_string),
            provider: ModelProvider::OpenAI,
            candidates: vec!["gpt-4o-mini".into()],
            content: ContentConfig::default(),
            scratch_root: std::env::temp_dir(),
            tools,
        }
    }

    fn missing_tools() -> ToolSettings {
        ToolSettings {
            yt_dlp: "cram-missing-yt-dlp".into(),
            ffmpeg: "cram-missing-ffmpeg".into(),
        }
    }

    #[test]
    fn test_text_needs_no_tools() {
        let config = config(Some("key"), missing_tools());
        assert!(check(&config, &ContentRequest::RawText("notes".into())).is_ok());
    }

    #[test]
    fn test_missing_credential_comes_first() {
        let config = config(None, missing_tools());
        let err = check(&config, &ContentRequest::VideoReference("dQw4w9WgXcQ".into())).unwrap_err();
        assert!(matches!(err, CramError::MissingCredential(ref p) if p == "openai"));
    }

    #[test]
    fn test_unknown_link_is_invalid_reference_before_tools() {
        let config = config(Some("key"), missing_tools());
        let err = check(&config, &ContentRequest::VideoReference("https://example.com/lecture".into()))
            .unwrap_err();
        assert!(matches!(err, CramError::InvalidReference(ref r) if r == "https://example.com/lecture"));
    }

    #[test]
    fn test_video_needs_yt_dlp() {
        let config = config(Some("key"), missing_tools());
        let err = check(&config, &ContentRequest::VideoReference("https://youtu.be/dQw4w9WgXcQ".into()))
            .unwrap_err();
        assert!(matches!(err, CramError::ToolNotFound(ref name) if name == "cram-missing-yt-dlp"));
    }

    #[cfg(unix)]
    #[test]
    fn test_video_does_not_need_ffmpeg_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let yt_dlp = crate::video::fake_tool(dir.path(), "yt-dlp", "echo 2024.12.13");
        let tools = ToolSettings {
            yt_dlp: yt_dlp.to_string_lossy().to_string(),
            ffmpeg: "cram-missing-ffmpeg".into(),
        };

        let config = config(Some("key"), tools);
        assert!(check(&config, &ContentRequest::VideoReference("https://youtu.be/dQw4w9WgXcQ".into())).is_ok());
    }

    #[test]
    fn test_missing_tool() {
        let err = check_tool(Path::new("cram-definitely-not-installed")).unwrap_err();
        assert!(matches!(err, CramError::ToolNotFound(ref name) if name == "cram-definitely-not-installed"));
    }
}
