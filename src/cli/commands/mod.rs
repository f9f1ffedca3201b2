//! CLI command implementations.

mod analyze;
mod config;
mod doctor;

pub use analyze::{run_analyze, AnalyzeArgs};
pub use config::run_config;
pub use doctor::run_doctor;
