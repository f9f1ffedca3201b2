//! Cram - turn study material into an exam-prep guide
//!
//! A CLI tool that takes pasted text, a PDF or image, or a video link and
//! asks a remote model for a three-line summary, the key terms, and
//! practice multiple-choice questions.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Settings and prompt templates
//! - `video` - Video link resolution and caption lookup
//! - `audio` - Audio download when a video has no usable captions
//! - `document` - Document type sniffing and PDF text extraction
//! - `content` - Normalizing every kind of material into one payload
//! - `llm` - Model backends and ordered candidate fallback
//! - `scratch` - Per-run scratch directories
//! - `report` - Study guides and their output formats
//! - `pipeline` - Coordination of a single run
//!
//! # Example
//!
//! ```rust,no_run
//! use cram::config::Settings;
//! use cram::content::ContentRequest;
//! use cram::pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let pipeline = Pipeline::from_settings(&settings, None)?;
//!
//!     let report = pipeline
//!         .run(ContentRequest::VideoReference("https://youtu.be/dQw4w9WgXcQ".into()))
//!         .await?;
//!     println!("{}", report.response);
//!
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod content;
pub mod document;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod report;
pub mod scratch;
pub mod video;

pub use error::{CramError, Result};
