//! OpenAI backend, with a client configured with sensible defaults.

use super::{AttemptError, Generation, ModelBackend, DEFAULT_TIMEOUT_SECS};
use crate::config::DEFAULT_MAX_CONTENT_CHARS;
use crate::content::{truncate_chars, Attachment, AttachmentKind};
use crate::error::Result;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    AudioInput, ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
    ChatCompletionRequestMessageContentPartText, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequestArgs, CreateTranscriptionRequestArgs, ImageDetail, ImageUrl,
};
use async_openai::Client;
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use base64::Engine;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Speech-to-text model used for audio attachments.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Backoff policy that gives up after the first failure.
///
/// Rate limits and server errors surface immediately so the dispatcher can
/// move on to the next candidate.
fn no_retry_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        max_elapsed_time: Some(Duration::ZERO),
        ..ExponentialBackoff::default()
    }
}

/// Create an OpenAI client with a request timeout and no built-in retries.
///
/// A zero timeout falls back to five minutes to prevent hung API calls.
pub fn create_client_with_timeout(config: OpenAIConfig, timeout: Duration) -> Result<Client<OpenAIConfig>> {
    let timeout = if timeout.is_zero() {
        Duration::from_secs(DEFAULT_TIMEOUT_SECS)
    } else {
        timeout
    };
    let http_client = reqwest::Client::builder().timeout(timeout).build()?;

    Ok(Client::with_config(config)
        .with_http_client(http_client)
        .with_backoff(no_retry_backoff()))
}

fn attempt_error(e: OpenAIError) -> AttemptError {
    match e {
        OpenAIError::Reqwest(e) => AttemptError::Transport(e.to_string()),
        OpenAIError::ApiError(api) if api.message.contains("maximum context length") => {
            AttemptError::PayloadTooLarge(api.message)
        }
        other => AttemptError::Client(other.to_string()),
    }
}

/// Chat-completions backend.
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    transcription_model: String,
    max_chars: usize,
}

impl OpenAiBackend {
    pub fn new(
        api_key: &str,
        base_url: Option<&str>,
        transcription_model: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = base_url {
            config = config.with_api_base(base.trim_end_matches('/'));
        }

        Ok(Self {
            client: create_client_with_timeout(config, timeout)?,
            transcription_model: transcription_model
                .unwrap_or(DEFAULT_TRANSCRIPTION_MODEL)
                .to_string(),
            max_chars: DEFAULT_MAX_CONTENT_CHARS,
        })
    }

    /// Character budget for audio transcripts. Zero keeps the default.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        if max_chars > 0 {
            self.max_chars = max_chars;
        }
        self
    }

    /// Speech-to-text for audio attachments, cut to the content budget.
    /// The flag is set when the transcript had to be cut.
    async fn transcribe(&self, attachment: &Attachment) -> std::result::Result<(String, bool), AttemptError> {
        info!("Transcribing audio with {}", self.transcription_model);

        let request = CreateTranscriptionRequestArgs::default()
            .file(AudioInput::from_vec_u8("audio.mp3".to_string(), attachment.bytes.clone()))
            .model(&self.transcription_model)
            .build()
            .map_err(attempt_error)?;

        let response = self.client.audio().transcribe(request).await.map_err(attempt_error)?;
        debug!("Transcript has {} chars", response.text.len());

        let kept = truncate_chars(&response.text, self.max_chars);
        let truncated = kept.len() < response.text.len();
        if truncated {
            warn!("Transcript truncated to the first {} characters", self.max_chars);
        }
        Ok((kept.to_string(), truncated))
    }

    /// User message content for a prompt and optional attachment, plus
    /// whether a derived transcript was cut.
    async fn user_content(
        &self,
        prompt: &str,
        attachment: Option<&Attachment>,
    ) -> std::result::Result<(ChatCompletionRequestUserMessageContent, bool), AttemptError> {
        let Some(attachment) = attachment else {
            return Ok((ChatCompletionRequestUserMessageContent::Text(prompt.to_string()), false));
        };

        match attachment.kind {
            AttachmentKind::Image => Ok((image_content(prompt, attachment), false)),
            AttachmentKind::Audio => {
                let (transcript, truncated) = self.transcribe(attachment).await?;
                let content = ChatCompletionRequestUserMessageContent::Text(format!(
                    "{}\n\n[Transcript of the attached audio]\n{}",
                    prompt, transcript
                ));
                Ok((content, truncated))
            }
            AttachmentKind::Pdf => Err(AttemptError::Unsupported(
                "PDF attachments are not accepted by the chat completions API".to_string(),
            )),
        }
    }
}

fn image_content(prompt: &str, attachment: &Attachment) -> ChatCompletionRequestUserMessageContent {
    let data_url = format!(
        "data:{};base64,{}",
        attachment.mime_type,
        base64::engine::general_purpose::STANDARD.encode(&attachment.bytes)
    );

    ChatCompletionRequestUserMessageContent::Array(vec![
        ChatCompletionRequestUserMessageContentPart::Text(ChatCompletionRequestMessageContentPartText {
            text: prompt.to_string(),
        }),
        ChatCompletionRequestUserMessageContentPart::ImageUrl(ChatCompletionRequestMessageContentPartImage {
            image_url: ImageUrl {
                url: data_url,
                detail: Some(ImageDetail::Auto),
            },
        }),
    ])
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip(self, prompt, attachment), fields(model = %model))]
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        attachment: Option<&Attachment>,
    ) -> std::result::Result<Generation, AttemptError> {
        let (content, input_truncated) = self.user_content(prompt, attachment).await?;

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestUserMessageArgs::default()
                .content(content)
                .build()
                .map_err(attempt_error)?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .temperature(0.7)
            .build()
            .map_err(attempt_error)?;

        let response = self.client.chat().create(request).await.map_err(attempt_error)?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(AttemptError::EmptyResponse)?;

        Ok(Generation { text, input_truncated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentSource, NormalizedPayload, PayloadContent};
    use crate::llm::Dispatcher;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(base: &str) -> OpenAiBackend {
        OpenAiBackend::new("sk-test", Some(base), None, Duration::from_secs(5)).unwrap()
    }

    fn completion(model: &str, content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }]
        })
    }

    #[test]
    fn test_image_content_is_data_url() {
        let attachment = Attachment {
            kind: AttachmentKind::Image,
            mime_type: "image/png".into(),
            bytes: b"abc".to_vec(),
        };

        let ChatCompletionRequestUserMessageContent::Array(parts) = image_content("Study", &attachment) else {
            panic!("expected content parts");
        };
        assert_eq!(parts.len(), 2);
        let ChatCompletionRequestUserMessageContentPart::ImageUrl(image) = &parts[1] else {
            panic!("expected image part");
        };
        assert_eq!(image.image_url.url, "data:image/png;base64,YWJj");
    }

    #[tokio::test]
    async fn test_pdf_attachment_is_unsupported() {
        let attachment = Attachment {
            kind: AttachmentKind::Pdf,
            mime_type: "application/pdf".into(),
            bytes: b"%PDF-".to_vec(),
        };

        let err = backend("http://127.0.0.1:9")
            .generate("gpt-4o-mini", "Study", Some(&attachment))
            .await
            .unwrap_err();

        assert!(matches!(err, AttemptError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("gpt-4o-mini", "[Part 1. Summary] Plants make sugar.")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let answer = backend(&server.uri())
            .generate("gpt-4o-mini", "Study this", None)
            .await
            .unwrap();

        assert_eq!(answer.text, "[Part 1. Summary] Plants make sugar.");
        assert!(!answer.input_truncated);
    }

    #[tokio::test]
    async fn test_rate_limited_model_falls_through_without_retrying() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "gpt-a"})))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {
                    "message": "Rate limit reached for gpt-a",
                    "type": "requests",
                    "param": null,
                    "code": "rate_limit_exceeded"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "gpt-b"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("gpt-b", "answer from B")))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new(
            Arc::new(backend(&server.uri())),
            vec!["gpt-a".to_string(), "gpt-b".to_string()],
        )
        .unwrap();
        let payload = NormalizedPayload {
            template: "Study:\n{{content}}".into(),
            content: PayloadContent::Text("Photosynthesis".into()),
            source: ContentSource::Text,
            truncated: false,
        };

        let outcome = tokio::time::timeout(Duration::from_secs(10), dispatcher.dispatch(&payload))
            .await
            .expect("rate limit must not be retried on the same model")
            .unwrap();

        assert_eq!(outcome.model, "gpt-b");
        assert_eq!(outcome.text, "answer from B");
        assert_eq!(outcome.failed_attempts.len(), 1);
        assert_eq!(outcome.failed_attempts[0].model, "gpt-a");
    }

    #[tokio::test]
    async fn test_transcript_respects_configured_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"text": "abcdefghijklmnopqrstuvwxyz"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("gpt-4o-mini", "guide")))
            .expect(1)
            .mount(&server)
            .await;

        let attachment = Attachment {
            kind: AttachmentKind::Audio,
            mime_type: "audio/mp3".into(),
            bytes: b"ID3fake-mp3".to_vec(),
        };
        let answer = backend(&server.uri())
            .with_max_chars(10)
            .generate("gpt-4o-mini", "Study", Some(&attachment))
            .await
            .unwrap();

        assert!(answer.input_truncated);

        let requests = server.received_requests().await.unwrap();
        let chat = requests
            .iter()
            .find(|r| r.url.path() == "/chat/completions")
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&chat.body).unwrap();
        let sent = body["messages"][0]["content"].as_str().unwrap();
        assert!(sent.ends_with("\nabcdefghij"), "sent: {sent}");
    }
}
