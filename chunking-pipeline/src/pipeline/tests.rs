use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{ChunkStore, MemoryStore},
    types::{Document, FinalChunk, MatchConfidence},
};
use serde_json::json;

use super::{ChunkingConfig, ChunkingPipeline, ChunkingReport, ChunkingTuning, PipelineServices};
use crate::{extraction::BoundaryModel, progress::ProgressReporter};

struct MockServices<M> {
    model: M,
    store: Arc<MemoryStore>,
}

#[async_trait]
impl<M: BoundaryModel> PipelineServices for MockServices<M> {
    fn boundary_model(&self) -> &dyn BoundaryModel {
        &self.model
    }

    async fn persist_chunks(
        &self,
        document_id: &str,
        chunks: Vec<FinalChunk>,
    ) -> Result<(), AppError> {
        self.store.delete_by_document(document_id).await?;
        self.store.store_chunks(document_id, chunks).await
    }
}

/// Always returns the same completion.
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

struct OutageModel;

#[async_trait]
impl BoundaryModel for OutageModel {
    async fn complete(
        &self,
        _system: &str,
        _user: &str,
        _schema: serde_json::Value,
    ) -> Result<String, AppError> {
        Err(AppError::Processing("simulated outage".into()))
    }
}

/// Makes pipeline tracing visible under `RUST_LOG` without double-init
/// panics across tests.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pipeline_with<M: BoundaryModel + 'static>(
    model: M,
    tuning: ChunkingTuning,
) -> (ChunkingPipeline, Arc<MemoryStore>) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let services = Arc::new(MockServices {
        model,
        store: Arc::clone(&store),
    });
    let config = ChunkingConfig {
        tuning,
        ..ChunkingConfig::default()
    };
    (ChunkingPipeline::new(services, config), store)
}

fn fast_tuning() -> ChunkingTuning {
    ChunkingTuning {
        max_retries: 2,
        retry_base_delay_ms: 1,
        min_chunk_size: 5,
        ..ChunkingTuning::default()
    }
}

async fn run(pipeline: &ChunkingPipeline, document: &Document) -> ChunkingReport {
    let cancel = AtomicBool::new(false);
    pipeline
        .process_document(document, &ProgressReporter::disabled(), &cancel)
        .await
        .expect("pipeline run succeeds")
}

fn chunk_entry(content: &str, start: usize, end: usize) -> serde_json::Value {
    json!({
        "content": content,
        "start_offset": start,
        "end_offset": end,
        "themes": ["test"],
        "concepts": [],
        "importance": 0.6,
        "summary": null,
        "domain": null,
        "emotional": null,
    })
}

#[tokio::test]
async fn well_behaved_model_yields_exact_persisted_chunks() {
    let text = "First paragraph about history.\n\nSecond paragraph about science.";
    let document = Document::new("doc-1", text);
    let first = &text[..30];
    let second = &text[32..];

    let response = json!({
        "chunks": [
            chunk_entry(first, 0, 30),
            chunk_entry(second, 32, text.len()),
        ]
    })
    .to_string();

    let (pipeline, store) = pipeline_with(FixedModel(response), fast_tuning());
    let report = run(&pipeline, &document).await;

    assert_eq!(report.chunks.len(), 2);
    assert_eq!(report.correction.exact, 2);
    assert_eq!(report.fallback_batches, 0);
    for (index, chunk) in report.chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, index);
        assert_eq!(chunk.confidence, MatchConfidence::Exact);
        assert_eq!(
            document.slice(chunk.start_offset, chunk.end_offset),
            Some(chunk.content.as_str())
        );
    }

    let stored = store.chunks_for("doc-1").await;
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn model_outage_degrades_to_deterministic_chunking() {
    let text = "A sentence of filler text. ".repeat(30);
    let document = Document::new("doc-2", &text);

    let (pipeline, store) = pipeline_with(OutageModel, fast_tuning());
    let report = run(&pipeline, &document).await;

    assert_eq!(report.fallback_batches, 1);
    assert!(!report.chunks.is_empty());
    // Fallback offsets are exact, so every chunk reconciles exactly.
    assert_eq!(report.correction.failed, 0);
    assert!(!store.chunks_for("doc-2").await.is_empty());
}

#[tokio::test]
async fn persistent_size_violations_split_the_batch_and_the_chunks() {
    let text = "z".repeat(200);
    let document = Document::new("doc-3", &text);

    // 60 chars of content against a 50-char cap, on every attempt.
    let oversized = json!({
        "chunks": [chunk_entry(&"q".repeat(60), 0, 200)]
    })
    .to_string();

    let tuning = ChunkingTuning {
        max_chunk_size: 50,
        ..fast_tuning()
    };
    let (pipeline, _) = pipeline_with(FixedModel(oversized), tuning);
    let report = run(&pipeline, &document).await;

    assert_eq!(report.split_batches, 1);
    assert!(report.oversized_split >= 1);
    assert!(!report.chunks.is_empty());
    for chunk in &report.chunks {
        assert!(chunk.content.chars().count() <= 50);
    }
}

#[tokio::test]
async fn anchor_widened_chunk_is_resplit_under_the_cap() {
    let head = "head ".repeat(21);
    let tail = "tail ".repeat(21);
    let source_middle = "source middle filler ".repeat(10);
    let text = format!("{head}{source_middle}{tail}");
    let document = Document::new("doc-8", &text);

    // An in-cap model chunk whose middle was reworded: the anchor tier maps
    // it onto the much wider source span, past the size cap.
    let content = format!("{head}model reworded middle {tail}");
    let response = json!({
        "chunks": [chunk_entry(&content, 0, content.len())]
    })
    .to_string();

    let tuning = ChunkingTuning {
        max_chunk_size: 250,
        ..fast_tuning()
    };
    let (pipeline, _) = pipeline_with(FixedModel(response), tuning);
    let report = run(&pipeline, &document).await;

    assert_eq!(report.correction.approximate, 1);
    assert!(report.oversized_split >= 1);
    assert!(report.chunks.len() > 1);
    for chunk in &report.chunks {
        assert!(
            chunk.content.chars().count() <= 250,
            "chunk is {} chars",
            chunk.content.chars().count()
        );
        assert_eq!(
            document.slice(chunk.start_offset, chunk.end_offset),
            Some(chunk.content.as_str())
        );
    }
}

#[tokio::test]
async fn renormalized_whitespace_is_reconciled_to_source_bytes() {
    let text = "line one\n\n   line two tail.";
    let document = Document::new("doc-4", text);

    let response = json!({
        "chunks": [chunk_entry("line one line two tail.", 0, 23)]
    })
    .to_string();

    let (pipeline, _) = pipeline_with(FixedModel(response), fast_tuning());
    let report = run(&pipeline, &document).await;

    assert_eq!(report.chunks.len(), 1);
    let chunk = &report.chunks[0];
    assert_eq!(chunk.confidence, MatchConfidence::Fuzzy);
    assert!(chunk.content.contains("\n\n"));
    assert_eq!(
        document.slice(chunk.start_offset, chunk.end_offset),
        Some(chunk.content.as_str())
    );
}

#[tokio::test]
async fn cancellation_skips_persistence() {
    let text = "Some document text worth chunking.";
    let document = Document::new("doc-5", text);
    let response = json!({
        "chunks": [chunk_entry(text, 0, text.len())]
    })
    .to_string();

    let (pipeline, store) = pipeline_with(FixedModel(response), fast_tuning());
    let cancel = AtomicBool::new(true);
    let report = pipeline
        .process_document(&document, &ProgressReporter::disabled(), &cancel)
        .await
        .expect("cancelled run still reports");

    assert!(report.cancelled);
    assert!(report.chunks.is_empty());
    assert!(store.chunks_for("doc-5").await.is_empty());
}

#[tokio::test]
async fn rerun_replaces_previously_stored_chunks() {
    let text = "Stable content for idempotency checks.";
    let document = Document::new("doc-6", text);
    let response = json!({
        "chunks": [chunk_entry(text, 0, text.len())]
    })
    .to_string();

    let (pipeline, store) = pipeline_with(FixedModel(response), fast_tuning());
    run(&pipeline, &document).await;
    let report = run(&pipeline, &document).await;

    let stored = store.chunks_for("doc-6").await;
    assert_eq!(stored.len(), report.chunks.len());
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn empty_document_is_a_clean_no_op() {
    let document = Document::new("doc-7", "");
    let (pipeline, store) = pipeline_with(OutageModel, fast_tuning());
    let report = run(&pipeline, &document).await;

    assert_eq!(report.batch_count, 0);
    assert!(report.chunks.is_empty());
    assert!(store.chunks_for("doc-7").await.is_empty());
}
