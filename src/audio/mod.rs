//! Audio acquisition for videos without usable captions.

mod downloader;

pub use downloader::{
    AudioAcquirer, AudioArtifact, IdentityPool, RequestIdentity, YtDlpAudio, AUDIO_FILE_STEM,
};
