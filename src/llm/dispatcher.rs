//! Ordered candidate fallback.
//!
//! Candidates are tried strictly in order. Any failure moves on to the next
//! one, except a payload that is too large for the endpoint, which would fail
//! the same way everywhere. When every candidate has failed the caller gets
//! `BackendExhausted` with the per-attempt records.

use super::{AttemptRecord, ModelBackend};
use crate::content::NormalizedPayload;
use crate::error::{CramError, Result};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Successful dispatch.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Candidate that produced the response.
    pub model: String,
    pub text: String,
    /// The backend had to cut the content further before sending it.
    pub input_truncated: bool,
    /// Candidates that failed before this one.
    pub failed_attempts: Vec<AttemptRecord>,
}

/// Dispatcher state.
#[derive(Debug)]
pub enum DispatchState {
    Trying(usize),
    Done(DispatchOutcome),
    Exhausted,
}

/// Sends payloads to the first candidate that accepts them.
pub struct Dispatcher {
    backend: Arc<dyn ModelBackend>,
    candidates: Vec<String>,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn ModelBackend>, candidates: Vec<String>) -> Result<Self> {
        if candidates.is_empty() {
            return Err(CramError::Config("no model candidates configured".into()));
        }
        Ok(Self { backend, candidates })
    }

    #[instrument(skip_all, fields(backend = self.backend.name(), candidates = self.candidates.len()))]
    pub async fn dispatch(&self, payload: &NormalizedPayload) -> Result<DispatchOutcome> {
        let prompt = payload.prompt();
        let attachment = payload.attachment();
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut state = DispatchState::Trying(0);

        loop {
            state = match state {
                DispatchState::Trying(index) if index >= self.candidates.len() => DispatchState::Exhausted,

                DispatchState::Trying(index) => {
                    let model = &self.candidates[index];
                    info!("Attempting model {} ({}/{})", model, index + 1, self.candidates.len());

                    match self.backend.generate(model, &prompt, attachment).await {
                        Ok(generation) => {
                            info!("Model {} answered ({} chars)", model, generation.text.len());
                            DispatchState::Done(DispatchOutcome {
                                model: model.clone(),
                                text: generation.text,
                                input_truncated: generation.input_truncated,
                                failed_attempts: std::mem::take(&mut attempts),
                            })
                        }
                        Err(error) if !error.is_retryable() => {
                            warn!("Model {} rejected the payload outright: {}", model, error);
                            return Err(CramError::PayloadTooLarge {
                                model: model.clone(),
                                detail: error.to_string(),
                            });
                        }
                        Err(error) => {
                            warn!("Model {} failed: {}", model, error);
                            attempts.push(AttemptRecord { model: model.clone(), error });
                            DispatchState::Trying(index + 1)
                        }
                    }
                }

                DispatchState::Done(outcome) => return Ok(outcome),

                DispatchState::Exhausted => {
                    warn!("All {} model candidates failed", attempts.len());
                    return Err(CramError::BackendExhausted { attempts });
                }
            };
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::content::{Attachment, ContentSource, PayloadContent};
    use crate::llm::{AttemptError, Generation};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Backend with scripted per-model results that records every call.
    pub(crate) struct ScriptedBackend {
        pub results: HashMap<String, std::result::Result<String, AttemptError>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(results: &[(&str, std::result::Result<&str, AttemptError>)]) -> Arc<Self> {
            Arc::new(Self {
                results: results
                    .iter()
                    .map(|(model, r)| (model.to_string(), r.clone().map(|s| s.to_string())))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            model: &str,
            _prompt: &str,
            _attachment: Option<&Attachment>,
        ) -> std::result::Result<Generation, AttemptError> {
            self.calls.lock().unwrap().push(model.to_string());
            self.results
                .get(model)
                .cloned()
                .unwrap_or(Err(AttemptError::Rejected { status: 404, body: "unknown model".into() }))
                .map(Generation::from)
        }
    }

    fn payload() -> NormalizedPayload {
        NormalizedPayload {
            template: "Study:\n{{content}}".into(),
            content: PayloadContent::Text("Photosynthesis".into()),
            source: ContentSource::Text,
            truncated: false,
        }
    }

    fn candidates(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn quota() -> AttemptError {
        AttemptError::Rejected { status: 429, body: "quota exceeded".into() }
    }

    #[tokio::test]
    async fn test_falls_through_to_first_success() {
        let backend = ScriptedBackend::new(&[
            ("A", Err(quota())),
            ("B", Err(AttemptError::Transport("connection reset".into()))),
            ("C", Ok("answer from C")),
        ]);
        let dispatcher = Dispatcher::new(backend.clone(), candidates(&["A", "B", "C"])).unwrap();

        let outcome = dispatcher.dispatch(&payload()).await.unwrap();

        assert_eq!(outcome.model, "C");
        assert_eq!(outcome.text, "answer from C");
        assert_eq!(backend.calls(), vec!["A", "B", "C"]);
        assert_eq!(outcome.failed_attempts.len(), 2);
        assert_eq!(outcome.failed_attempts[0].model, "A");
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let backend = ScriptedBackend::new(&[("A", Ok("first")), ("B", Ok("second"))]);
        let dispatcher = Dispatcher::new(backend.clone(), candidates(&["A", "B"])).unwrap();

        let outcome = dispatcher.dispatch(&payload()).await.unwrap();

        assert_eq!(outcome.text, "first");
        assert_eq!(backend.calls(), vec!["A"]);
        assert!(outcome.failed_attempts.is_empty());
    }

    #[tokio::test]
    async fn test_all_failing_is_exhausted() {
        let backend = ScriptedBackend::new(&[
            ("A", Err(quota())),
            ("B", Err(AttemptError::EmptyResponse)),
            ("C", Err(AttemptError::Rejected { status: 401, body: "API key not valid".into() })),
        ]);
        let dispatcher = Dispatcher::new(backend.clone(), candidates(&["A", "B", "C"])).unwrap();

        let err = dispatcher.dispatch(&payload()).await.unwrap_err();

        let CramError::BackendExhausted { attempts } = err else {
            panic!("expected BackendExhausted, got {err:?}");
        };
        assert_eq!(attempts.len(), 3);
        assert_eq!(backend.calls(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_payload_too_large_fails_fast() {
        let backend = ScriptedBackend::new(&[
            ("A", Err(AttemptError::PayloadTooLarge("413".into()))),
            ("B", Ok("never reached")),
        ]);
        let dispatcher = Dispatcher::new(backend.clone(), candidates(&["A", "B"])).unwrap();

        let err = dispatcher.dispatch(&payload()).await.unwrap_err();

        assert!(matches!(err, CramError::PayloadTooLarge { ref model, .. } if model == "A"));
        assert_eq!(backend.calls(), vec!["A"]);
    }

    #[test]
    fn test_empty_candidate_list_is_config_error() {
        let backend = ScriptedBackend::new(&[]);
        assert!(matches!(Dispatcher::new(backend, Vec::new()), Err(CramError::Config(_))));
    }
}
