//! Gemini REST backend.

use super::{AttemptError, Generation, ModelBackend};
use crate::content::Attachment;
use crate::error::Result;
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Public Gemini API endpoint.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Longest error body kept in diagnostics.
const MAX_ERROR_BODY: usize = 2_000;

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

/// Gemini `generateContent` client.
pub struct GeminiBackend {
    api_key: String,
    base_url: String,
    client: Client,
}

impl GeminiBackend {
    pub fn new(api_key: &str, base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or(DEFAULT_GEMINI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client,
        })
    }

    fn build_request(prompt: &str, attachment: Option<&Attachment>) -> GeminiRequest {
        let mut parts = vec![Part::Text {
            text: prompt.to_string(),
        }];

        if let Some(attachment) = attachment {
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: attachment.mime_type.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(&attachment.bytes),
                },
            });
        }

        GeminiRequest {
            contents: vec![Content { role: "user", parts }],
        }
    }
}

fn clip(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

fn response_text(response: GeminiResponse) -> std::result::Result<String, AttemptError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(AttemptError::Rejected {
            status: 200,
            body: format!("prompt blocked: {}", reason),
        });
    }

    let candidate = response.candidates.into_iter().next().ok_or(AttemptError::EmptyResponse)?;
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        debug!("Empty candidate, finish reason {:?}", candidate.finish_reason);
        return Err(AttemptError::EmptyResponse);
    }

    Ok(text)
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    #[instrument(skip(self, prompt, attachment), fields(model = %model))]
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        attachment: Option<&Attachment>,
    ) -> std::result::Result<Generation, AttemptError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let request = Self::build_request(prompt, attachment);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = clip(&response.text().await.unwrap_or_default());
            if status == StatusCode::PAYLOAD_TOO_LARGE {
                return Err(AttemptError::PayloadTooLarge(body));
            }
            return Err(AttemptError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Client(format!("failed to parse Gemini response: {}", e)))?;

        response_text(parsed).map(Generation::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::AttachmentKind;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> GeminiBackend {
        GeminiBackend::new("test-key", Some(&server.uri()), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_request_shape() {
        let attachment = Attachment {
            kind: AttachmentKind::Audio,
            mime_type: "audio/mp3".into(),
            bytes: b"abc".to_vec(),
        };
        let request = GeminiBackend::build_request("Summarize", Some(&attachment));
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["contents"][0]["parts"][0]["text"], "Summarize");
        assert_eq!(value["contents"][0]["parts"][1]["inlineData"]["mimeType"], "audio/mp3");
        assert_eq!(value["contents"][0]["parts"][1]["inlineData"]["data"], "YWJj");
    }

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({"contents": [{"role": "user"}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"parts": [{"text": "[Part 1. "}, {"text": "Summary]"}]},
                    "finishReason": "STOP"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let answer = backend(&server)
            .generate("gemini-2.5-flash", "Study this", None)
            .await
            .unwrap();

        assert_eq!(answer.text, "[Part 1. Summary]");
        assert!(!answer.input_truncated);
    }

    #[tokio::test]
    async fn test_error_status_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("API key not valid"))
            .mount(&server)
            .await;

        let err = backend(&server).generate("m", "p", None).await.unwrap_err();

        assert_eq!(
            err,
            AttemptError::Rejected { status: 400, body: "API key not valid".into() }
        );
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(413).set_body_string("Request Entity Too Large"))
            .mount(&server)
            .await;

        let err = backend(&server).generate("m", "p", None).await.unwrap_err();
        assert!(matches!(err, AttemptError::PayloadTooLarge(_)));
    }

    #[tokio::test]
    async fn test_blocked_or_empty_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/blocked:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": {"blockReason": "SAFETY"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/models/empty:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"finishReason": "MAX_TOKENS"}]
            })))
            .mount(&server)
            .await;

        let backend = backend(&server);
        let blocked = backend.generate("blocked", "p", None).await.unwrap_err();
        assert!(matches!(blocked, AttemptError::Rejected { ref body, .. } if body.contains("SAFETY")));

        let empty = backend.generate("empty", "p", None).await.unwrap_err();
        assert_eq!(empty, AttemptError::EmptyResponse);
    }
}
