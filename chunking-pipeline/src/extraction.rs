use std::sync::Arc;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use async_trait::async_trait;
use common::{
    error::AppError,
    types::{DocumentType, RawChunkCandidate},
};
use serde::Deserialize;
use text_splitter::{ChunkCapacity, ChunkConfig, TextSplitter};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    batching::DocumentBatch,
    pipeline::ChunkingTuning,
    prompts::{build_boundary_prompt, boundary_response_schema, BOUNDARY_SYSTEM_MESSAGE},
    retry::{is_non_retryable, RetryPolicy},
};

/// The LLM seam of the pipeline: one strict-JSON completion per batch.
/// Model identity and endpoint are configuration, not contract.
#[async_trait]
pub trait BoundaryModel: Send + Sync {
    async fn complete(
        &self,
        system_message: &str,
        user_message: &str,
        schema: serde_json::Value,
    ) -> Result<String, AppError>;
}

pub struct OpenAiBoundaryModel {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiBoundaryModel {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl BoundaryModel for OpenAiBoundaryModel {
    async fn complete(
        &self,
        system_message: &str,
        user_message: &str,
        schema: serde_json::Value,
    ) -> Result<String, AppError> {
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Semantic chunk boundaries with metadata".into()),
                name: "boundary_extraction".into(),
                schema: Some(schema),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(0.0)
            .messages([
                ChatCompletionRequestSystemMessage::from(system_message).into(),
                ChatCompletionRequestUserMessage::from(user_message).into(),
            ])
            .response_format(response_format)
            .build()?;

        let response = self.client.chat().create(request).await?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::LLMParsing("No content found in LLM response".into()))
    }
}

#[derive(Debug, Deserialize)]
struct BoundaryResponse {
    chunks: Vec<RawChunkCandidate>,
}

/// Result of one batch extraction. The extractor never fails a batch: after
/// retries it degrades to the model's last size-violating output (for the
/// splitter to absorb) or to deterministic local chunking.
#[derive(Debug)]
pub struct ExtractionOutcome {
    pub candidates: Vec<RawChunkCandidate>,
    pub used_fallback: bool,
    pub size_violation: bool,
    pub attempts: usize,
}

enum AttemptError {
    /// Parsed fine but at least one chunk exceeds the hard size cap.
    SizeViolation(Vec<RawChunkCandidate>),
    Failed(AppError),
}

/// Calls the boundary model for one batch with retry/backoff, JSON salvage,
/// and the degradation ladder described in the pipeline error taxonomy.
pub async fn extract_batch(
    model: &dyn BoundaryModel,
    batch: &DocumentBatch,
    tuning: &ChunkingTuning,
    document_type: Option<DocumentType>,
) -> ExtractionOutcome {
    let policy = RetryPolicy::new(
        tuning.max_retries,
        Duration::from_millis(tuning.retry_base_delay_ms),
    );
    let mut delays = policy.delays();
    let mut attempts = 0usize;
    let mut last_oversized: Option<Vec<RawChunkCandidate>> = None;

    loop {
        attempts = attempts.saturating_add(1);
        match attempt_extraction(model, batch, tuning, document_type).await {
            Ok(candidates) => {
                return ExtractionOutcome {
                    candidates,
                    used_fallback: false,
                    size_violation: false,
                    attempts,
                };
            }
            Err(AttemptError::SizeViolation(candidates)) => {
                warn!(
                    batch_id = batch.batch_id,
                    attempt = attempts,
                    "model violated chunk size cap; retrying"
                );
                last_oversized = Some(candidates);
            }
            Err(AttemptError::Failed(err)) => {
                if is_non_retryable(&err) {
                    warn!(
                        batch_id = batch.batch_id,
                        attempt = attempts,
                        error = %err,
                        "non-retryable extraction error; aborting retries"
                    );
                    break;
                }
                warn!(
                    batch_id = batch.batch_id,
                    attempt = attempts,
                    error = %err,
                    "extraction attempt failed"
                );
            }
        }

        match delays.next() {
            Some(delay) => sleep(delay).await,
            None => break,
        }
    }

    // Retries exhausted. A parsed-but-oversized response is still better
    // than local chunking: the deterministic splitter brings it under the
    // cap downstream.
    if let Some(candidates) = last_oversized {
        return ExtractionOutcome {
            candidates,
            used_fallback: false,
            size_violation: true,
            attempts,
        };
    }

    warn!(
        batch_id = batch.batch_id,
        attempts, "extraction exhausted retries; using deterministic fallback chunking"
    );
    ExtractionOutcome {
        candidates: fallback_candidates(batch, tuning),
        used_fallback: true,
        size_violation: false,
        attempts,
    }
}

async fn attempt_extraction(
    model: &dyn BoundaryModel,
    batch: &DocumentBatch,
    tuning: &ChunkingTuning,
    document_type: Option<DocumentType>,
) -> Result<Vec<RawChunkCandidate>, AttemptError> {
    let prompt = build_boundary_prompt(
        batch,
        tuning.min_chunk_size,
        tuning.max_chunk_size,
        document_type,
    );

    let raw = model
        .complete(BOUNDARY_SYSTEM_MESSAGE, &prompt, boundary_response_schema())
        .await
        .map_err(AttemptError::Failed)?;

    let candidates = parse_boundary_response(&raw).map_err(AttemptError::Failed)?;

    let usable = candidates.iter().any(|candidate| {
        candidate.content.as_deref().is_some_and(|c| !c.is_empty())
            && candidate.start_offset.is_some()
            && candidate.end_offset.is_some()
            && candidate.start_offset < candidate.end_offset
    });
    if !usable {
        return Err(AttemptError::Failed(AppError::LLMParsing(
            "response contained no usable chunk entries".into(),
        )));
    }

    let oversized = candidates.iter().any(|candidate| {
        candidate
            .content
            .as_deref()
            .is_some_and(|c| c.chars().count() > tuning.max_chunk_size)
    });
    if oversized {
        return Err(AttemptError::SizeViolation(candidates));
    }

    debug!(
        batch_id = batch.batch_id,
        candidate_count = candidates.len(),
        "boundary model returned candidates"
    );
    Ok(candidates)
}

/// Parses the model's JSON, salvaging truncated output before giving up.
pub fn parse_boundary_response(raw: &str) -> Result<Vec<RawChunkCandidate>, AppError> {
    match serde_json::from_str::<BoundaryResponse>(raw) {
        Ok(response) => Ok(response.chunks),
        Err(primary) => salvage_truncated(raw).ok_or_else(|| {
            AppError::LLMParsing(format!("Failed to parse boundary response: {primary}"))
        }),
    }
}

/// Two salvage strategies for output cut off mid-stream: reclose after the
/// last complete array (`}]`), or after the last complete element (`},`).
fn salvage_truncated(raw: &str) -> Option<Vec<RawChunkCandidate>> {
    if let Some(pos) = raw.rfind("}]") {
        let prefix = raw.get(..pos.saturating_add(2))?;
        let candidate = format!("{prefix}}}");
        if let Ok(response) = serde_json::from_str::<BoundaryResponse>(&candidate) {
            return Some(response.chunks);
        }
    }

    if let Some(pos) = raw.rfind("},") {
        let prefix = raw.get(..pos.saturating_add(1))?;
        let candidate = format!("{prefix}]}}");
        if let Ok(response) = serde_json::from_str::<BoundaryResponse>(&candidate) {
            return Some(response.chunks);
        }
    }

    None
}

/// Deterministic local chunking for a batch the model could not handle:
/// fixed-size split with minimal metadata. Offsets are batch-relative and
/// exact, so downstream correction is a no-op for these chunks.
pub fn fallback_candidates(batch: &DocumentBatch, tuning: &ChunkingTuning) -> Vec<RawChunkCandidate> {
    let desired = tuning.min_chunk_size.min(tuning.max_chunk_size).max(1);
    let capacity = match ChunkCapacity::new(desired).with_max(tuning.max_chunk_size.max(desired)) {
        Ok(capacity) => capacity,
        Err(_) => ChunkCapacity::new(tuning.max_chunk_size.max(1)),
    };
    // trim(false) keeps every source byte so offsets line up exactly.
    let config = ChunkConfig::new(capacity).with_trim(false);
    let splitter = TextSplitter::new(config);

    splitter
        .chunk_indices(&batch.content)
        .map(|(offset, chunk)| RawChunkCandidate {
            content: Some(chunk.to_string()),
            start_offset: i64::try_from(offset).ok(),
            end_offset: i64::try_from(offset.saturating_add(chunk.len())).ok(),
            themes: Some(vec!["general".to_string()]),
            concepts: Some(Vec::new()),
            importance: Some(0.5),
            summary: None,
            domain: None,
            emotional: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuning() -> ChunkingTuning {
        ChunkingTuning {
            min_chunk_size: 10,
            max_chunk_size: 60,
            max_retries: 2,
            retry_base_delay_ms: 1,
            ..ChunkingTuning::default()
        }
    }

    fn batch(content: &str) -> DocumentBatch {
        DocumentBatch {
            batch_id: 0,
            content: content.to_string(),
            start_offset: 0,
            end_offset: content.len(),
        }
    }

    struct AlwaysFailingModel;

    #[async_trait]
    impl BoundaryModel for AlwaysFailingModel {
        async fn complete(
            &self,
            _system: &str,
            _user: &str,
            _schema: serde_json::Value,
        ) -> Result<String, AppError> {
            Err(AppError::Processing("simulated outage".into()))
        }
    }

    struct FixedModel(String);

    #[async_trait]
    impl BoundaryModel for FixedModel {
        async fn complete(
            &self,
            _system: &str,
            _user: &str,
            _schema: serde_json::Value,
        ) -> Result<String, AppError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn parses_well_formed_response() {
        let raw = r#"{"chunks":[{"content":"abc","start_offset":0,"end_offset":3,
            "themes":["t"],"concepts":[],"importance":0.7,"summary":null,"domain":null,
            "emotional":null}]}"#;
        let chunks = parse_boundary_response(raw).expect("parses");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.as_deref(), Some("abc"));
    }

    #[test]
    fn salvages_response_truncated_after_array_close() {
        let raw = r#"{"chunks":[{"content":"abc","start_offset":0,"end_offset":3}]"#;
        let chunks = parse_boundary_response(raw).expect("salvaged");
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn salvages_response_truncated_mid_element() {
        let raw = r#"{"chunks":[{"content":"abc","start_offset":0,"end_offset":3},{"content":"trunc"#;
        let chunks = parse_boundary_response(raw).expect("salvaged");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.as_deref(), Some("abc"));
    }

    #[test]
    fn unsalvageable_garbage_is_an_error() {
        assert!(parse_boundary_response("not json at all").is_err());
    }

    #[test]
    fn fallback_covers_the_batch_exactly() {
        let text = "word ".repeat(50);
        let candidates = fallback_candidates(&batch(&text), &tuning());
        assert!(!candidates.is_empty());

        let mut rebuilt = String::new();
        for candidate in &candidates {
            rebuilt.push_str(candidate.content.as_deref().unwrap_or_default());
        }
        assert_eq!(rebuilt, text, "fallback chunks must cover every byte");

        for candidate in &candidates {
            let content = candidate.content.as_deref().unwrap_or_default();
            assert!(content.chars().count() <= 60);
            let start = candidate.start_offset.and_then(|v| usize::try_from(v).ok());
            let end = candidate.end_offset.and_then(|v| usize::try_from(v).ok());
            let (Some(start), Some(end)) = (start, end) else {
                panic!("fallback offsets missing");
            };
            assert_eq!(text.get(start..end), Some(content));
        }
    }

    #[tokio::test]
    async fn always_failing_model_degrades_to_fallback() {
        let text = "sentence one. sentence two. sentence three. ".repeat(4);
        let outcome = extract_batch(&AlwaysFailingModel, &batch(&text), &tuning(), None).await;
        assert!(outcome.used_fallback);
        assert!(!outcome.candidates.is_empty());
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn oversized_output_is_kept_for_the_splitter() {
        let body = "x".repeat(200);
        let raw = format!(
            r#"{{"chunks":[{{"content":"{body}","start_offset":0,"end_offset":200}}]}}"#
        );
        let text = "y".repeat(200);
        let outcome = extract_batch(&FixedModel(raw), &batch(&text), &tuning(), None).await;
        assert!(outcome.size_violation);
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.candidates.len(), 1);
    }
}
