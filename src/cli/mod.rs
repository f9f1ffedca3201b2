//! CLI module for Cram.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Cram - turn study material into an exam-prep guide
///
/// Feed it pasted text, a PDF or image, or a video link, and get back a
/// three-line summary, key terms, and practice multiple-choice questions.
#[derive(Parser, Debug)]
#[command(name = "cram")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze study material and print a study guide
    Analyze {
        /// Video link or ID, PDF/image path, or '-' to read text from stdin
        input: Option<String>,

        /// Analyze this text directly
        #[arg(long, conflicts_with_all = ["input", "file", "url"])]
        text: Option<String>,

        /// Analyze a PDF or image file
        #[arg(short, long, conflicts_with_all = ["input", "url"])]
        file: Option<String>,

        /// Analyze a video link or ID
        #[arg(short, long, conflicts_with = "input")]
        url: Option<String>,

        /// Output format (text, markdown, json)
        #[arg(long, default_value = "text")]
        format: String,

        /// Write the study guide to a file instead of stdout
        #[arg(short, long)]
        output: Option<String>,

        /// Try only this model instead of the configured candidates
        #[arg(short, long)]
        model: Option<String>,

        /// API key for the model provider
        #[arg(long, env = "CRAM_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Check system requirements and configuration
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_analyze_positional_input() {
        let cli = Cli::try_parse_from(["cram", "-v", "analyze", "https://youtu.be/dQw4w9WgXcQ", "--format", "md"])
            .unwrap();

        assert_eq!(cli.verbose, 1);
        let Commands::Analyze { input, format, text, .. } = cli.command else {
            panic!("expected analyze");
        };
        assert_eq!(input.as_deref(), Some("https://youtu.be/dQw4w9WgXcQ"));
        assert_eq!(format, "md");
        assert!(text.is_none());
    }

    #[test]
    fn test_text_conflicts_with_input() {
        let result = Cli::try_parse_from(["cram", "analyze", "notes.pdf", "--text", "hello"]);
        assert!(result.is_err());
    }
}
