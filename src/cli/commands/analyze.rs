//! Analyze command implementation.

use crate::cli::preflight;
use crate::cli::Output;
use crate::config::Settings;
use crate::content::ContentRequest;
use crate::document::DocumentKind;
use crate::error::CramError;
use crate::pipeline::Pipeline;
use crate::report::{format_report, OutputFormat};
use crate::video;
use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Arguments of the analyze command.
#[derive(Debug, Default)]
pub struct AnalyzeArgs {
    pub input: Option<String>,
    pub text: Option<String>,
    pub file: Option<String>,
    pub url: Option<String>,
    pub format: String,
    pub output: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

/// Run the analyze command.
pub async fn run_analyze(args: AnalyzeArgs, mut settings: Settings) -> Result<()> {
    let format: OutputFormat = args.format.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    if let Some(model) = &args.model {
        settings.models.candidates = vec![model.clone()];
    }

    let request = build_request(&args).await?;
    let pipeline = Pipeline::from_settings(&settings, args.api_key.as_deref())?;

    // Pre-flight checks
    if let Err(e) = preflight::check(pipeline.config(), &request) {
        Output::error(&format!("{}", e));
        Output::info("Run 'cram doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let spinner = Output::spinner(&format!("Analyzing {}...", describe(&request)));
    // Dropping the run future on Ctrl-C removes its scratch directory.
    let result = tokio::select! {
        result = pipeline.run(request) => result,
        _ = tokio::signal::ctrl_c() => {
            spinner.finish_and_clear();
            Output::warning("Interrupted");
            return Err(anyhow::anyhow!("interrupted"));
        }
    };
    spinner.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            Output::error(&format!("{}", e));
            if let CramError::BackendExhausted { attempts } = &e {
                Output::attempts(attempts);
            } else if e.is_input_error() {
                Output::info("Nothing was sent to a model. Check the material and try again.");
            }
            return Err(e.into());
        }
    };

    if !report.attempts_failed.is_empty() {
        Output::warning(&format!(
            "{} model(s) failed before {} answered:",
            report.attempts_failed.len(),
            report.model
        ));
        Output::attempts(&report.attempts_failed);
    }
    if report.truncated {
        Output::warning("The material was too long and only its beginning was analyzed.");
    }

    let rendered = format_report(&report, format);
    match &args.output {
        Some(path) => {
            std::fs::write(path, &rendered).with_context(|| format!("Failed to write {}", path))?;
            Output::success(&format!("Study guide written to {} ({})", path, report.source));
        }
        None => {
            print!("{}", rendered);
            Output::kv("Source", &report.source.to_string());
            Output::kv("Model", &report.model);
        }
    }

    Ok(())
}

/// Turn the command-line arguments into a request.
async fn build_request(args: &AnalyzeArgs) -> Result<ContentRequest> {
    if let Some(text) = &args.text {
        return Ok(ContentRequest::RawText(text.clone()));
    }
    if let Some(file) = &args.file {
        return read_document(Path::new(file));
    }
    if let Some(url) = &args.url {
        return Ok(ContentRequest::VideoReference(url.clone()));
    }

    match args.input.as_deref() {
        Some("-") => Ok(ContentRequest::RawText(read_stdin().await?)),
        Some(input) => classify_input(input),
        None if !std::io::stdin().is_terminal() => Ok(ContentRequest::RawText(read_stdin().await?)),
        None => Err(anyhow::anyhow!(
            "Nothing to analyze. Pass a video link, a file, --text, or pipe text on stdin."
        )),
    }
}

/// Decide what a positional input refers to.
///
/// Existing files are documents, links are video references, and everything
/// else is study text. A bare video ID is indistinguishable from an
/// 11-character word, so it needs `--url`.
fn classify_input(input: &str) -> Result<ContentRequest> {
    let path = Settings::expand_path(input);
    if path.is_file() {
        return read_document(&path);
    }

    let trimmed = input.trim();
    if is_link(trimmed) {
        return Ok(ContentRequest::VideoReference(trimmed.to_string()));
    }

    Ok(ContentRequest::RawText(input.to_string()))
}

fn is_link(input: &str) -> bool {
    input.starts_with("http://")
        || input.starts_with("https://")
        || (video::resolve(input).is_some() && video::VideoId::parse(input).is_none())
}

fn read_document(path: &Path) -> Result<ContentRequest> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let kind = DocumentKind::sniff(&bytes, Some(path)).ok_or_else(|| {
        CramError::InvalidInput(format!(
            "{} is not a PDF or a supported image (png, jpeg, gif, webp, heic)",
            path.display()
        ))
    })?;
    Ok(ContentRequest::Document { bytes, kind })
}

async fn read_stdin() -> Result<String> {
    let mut text = String::new();
    tokio::io::stdin()
        .read_to_string(&mut text)
        .await
        .context("Failed to read stdin")?;
    Ok(text)
}

fn describe(request: &ContentRequest) -> String {
    match request {
        ContentRequest::RawText(text) => format!("{} characters of text", text.chars().count()),
        ContentRequest::Document { kind: DocumentKind::Pdf, .. } => "PDF".to_string(),
        ContentRequest::Document { kind: DocumentKind::Image(mime), .. } => format!("image ({})", mime),
        ContentRequest::VideoReference(reference) => reference.clone(),
    }
}
