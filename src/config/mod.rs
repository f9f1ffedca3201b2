//! Configuration module for Cram.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{Prompts, StudyPrompts};
pub use settings::{
    AudioSettings, ContentSettings, DocumentSettings, GeneralSettings, ModelProvider,
    ModelSettings, PromptSettings, Settings, SubtitleSettings, ToolSettings,
    DEFAULT_MAX_CONTENT_CHARS,
};
