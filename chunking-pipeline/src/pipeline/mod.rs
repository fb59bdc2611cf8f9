mod config;
mod services;

pub use config::{ChunkingConfig, ChunkingTuning};
pub use services::{DefaultPipelineServices, PipelineServices};

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{
    error::AppError,
    types::{Document, FinalChunk},
};
use tracing::{info, instrument, warn};

use crate::{
    batching::{create_batches, split_batch, DocumentBatch},
    correction::{verify_offsets, CorrectionStats, OffsetCorrector},
    dedupe::dedupe_chunks,
    extraction::{extract_batch, ExtractionOutcome},
    progress::{ProgressPhase, ProgressReporter, ProgressUpdate},
    splitting::{resplit_corrected, split_oversized},
    validation::validate_candidates,
};

/// Everything a caller needs to know about a finished (or cancelled) run.
#[derive(Debug)]
pub struct ChunkingReport {
    pub document_id: String,
    pub chunks: Vec<FinalChunk>,
    pub batch_count: usize,
    /// Batches that ended up on deterministic local chunking.
    pub fallback_batches: usize,
    /// Batches split in half after repeated size violations.
    pub split_batches: usize,
    /// Over-cap chunks broken up by the deterministic splitter.
    pub oversized_split: usize,
    pub invalid_candidates: usize,
    pub duplicates_removed: usize,
    pub correction: CorrectionStats,
    pub verification_mismatches: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// Drives one document through batching, boundary extraction, validation,
/// offset correction, dedup and persistence. Holds no per-run state; one
/// pipeline value can process documents sequentially forever.
pub struct ChunkingPipeline {
    services: Arc<dyn PipelineServices>,
    config: ChunkingConfig,
}

impl ChunkingPipeline {
    pub fn new(services: Arc<dyn PipelineServices>, config: ChunkingConfig) -> Self {
        Self { services, config }
    }

    /// Processes one document end to end. Cancellation is checked between
    /// batches; a cancelled run returns the partial report without touching
    /// the store.
    #[instrument(skip_all, fields(document_id = %document.id, document_len = document.len()))]
    pub async fn process_document(
        &self,
        document: &Document,
        progress: &ProgressReporter,
        cancel: &AtomicBool,
    ) -> Result<ChunkingReport, AppError> {
        let started = Instant::now();
        let tuning = &self.config.tuning;

        if document.is_empty() {
            return Ok(self.empty_report(document, started));
        }

        let batches = create_batches(document, tuning.max_batch_size, tuning.overlap_size);
        let batch_count = batches.len();
        self.report_phase(progress, document, ProgressPhase::Batching, 0, batch_count, 0);

        let mut validated = Vec::new();
        let mut fallback_batches = 0usize;
        let mut split_batches = 0usize;
        let mut oversized_split = 0usize;
        let mut invalid_candidates = 0usize;
        let mut cancelled = false;

        for (done, batch) in batches.into_iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                warn!(batches_done = done, "chunking cancelled between batches");
                cancelled = true;
                break;
            }

            let units = self.extract_units(batch, &mut split_batches).await;
            for (unit, outcome) in units {
                if outcome.used_fallback {
                    fallback_batches = fallback_batches.saturating_add(1);
                }

                let result =
                    validate_candidates(outcome.candidates, &unit, document, &self.config)?;
                invalid_candidates = invalid_candidates.saturating_add(result.invalid.len());
                validated.extend(result.valid);
                for chunk in result.oversized {
                    let pieces = split_oversized(&chunk, document, tuning.max_chunk_size);
                    oversized_split = oversized_split.saturating_add(1);
                    validated.extend(pieces);
                }
            }

            self.report_phase(
                progress,
                document,
                ProgressPhase::AiChunking,
                done.saturating_add(1),
                batch_count,
                validated.len(),
            );
        }

        // Splitter output lands after in-cap chunks of the same batch, so
        // restore document order before the monotonic-cursor correction pass.
        validated.sort_by(|a, b| {
            a.start_offset
                .cmp(&b.start_offset)
                .then(a.end_offset.cmp(&b.end_offset))
        });

        let mut corrector = OffsetCorrector::new();
        let (corrected, correction) = corrector.correct(document, validated, tuning);
        // Anchor matches can widen a chunk onto a source span larger than
        // the cap; the cap is re-applied before anything downstream sees it.
        let (corrected, resplit) = resplit_corrected(corrected, document, tuning.max_chunk_size);
        oversized_split = oversized_split.saturating_add(resplit);
        let verification_mismatches =
            verify_offsets(document, &corrected, tuning.correction_failure_threshold)?;

        self.report_phase(
            progress,
            document,
            ProgressPhase::Deduplication,
            batch_count,
            batch_count,
            corrected.len(),
        );
        let (deduped, duplicates_removed) = dedupe_chunks(corrected, tuning.dedupe_overlap_ratio);

        let chunks: Vec<FinalChunk> = deduped
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| FinalChunk::new(&document.id, index, chunk))
            .collect();

        if !cancelled {
            self.services
                .persist_chunks(&document.id, chunks.clone())
                .await?;
        }

        self.report_phase(
            progress,
            document,
            ProgressPhase::Complete,
            batch_count,
            batch_count,
            chunks.len(),
        );

        let report = ChunkingReport {
            document_id: document.id.clone(),
            chunks,
            batch_count,
            fallback_batches,
            split_batches,
            oversized_split,
            invalid_candidates,
            duplicates_removed,
            correction,
            verification_mismatches,
            cancelled,
            elapsed: started.elapsed(),
        };

        info!(
            chunk_count = report.chunks.len(),
            batch_count = report.batch_count,
            fallback_batches = report.fallback_batches,
            duplicates_removed = report.duplicates_removed,
            exact = report.correction.exact,
            fuzzy = report.correction.fuzzy,
            approximate = report.correction.approximate,
            failed = report.correction.failed,
            cancelled = report.cancelled,
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            "chunking run finished"
        );
        Ok(report)
    }

    /// Extracts one batch, escalating to a midpoint split when the model
    /// keeps violating the size cap on the full window. The halves get one
    /// full retry cycle each; a second violation is absorbed downstream by
    /// the deterministic splitter.
    async fn extract_units(
        &self,
        batch: DocumentBatch,
        split_batches: &mut usize,
    ) -> Vec<(DocumentBatch, ExtractionOutcome)> {
        let tuning = &self.config.tuning;
        let document_type = self.config.document_type;

        let outcome = extract_batch(
            self.services.boundary_model(),
            &batch,
            tuning,
            document_type,
        )
        .await;

        if !outcome.size_violation || batch.len() <= tuning.max_chunk_size {
            return vec![(batch, outcome)];
        }

        warn!(
            batch_id = batch.batch_id,
            batch_len = batch.len(),
            "size violations persisted across retries; splitting batch at midpoint"
        );
        *split_batches = split_batches.saturating_add(1);

        let (left, right) = split_batch(&batch);
        let left_outcome = extract_batch(
            self.services.boundary_model(),
            &left,
            tuning,
            document_type,
        )
        .await;
        let right_outcome = extract_batch(
            self.services.boundary_model(),
            &right,
            tuning,
            document_type,
        )
        .await;

        vec![(left, left_outcome), (right, right_outcome)]
    }

    fn report_phase(
        &self,
        progress: &ProgressReporter,
        document: &Document,
        phase: ProgressPhase,
        batches_processed: usize,
        total_batches: usize,
        chunks_identified: usize,
    ) {
        progress.report(ProgressUpdate {
            document_id: document.id.clone(),
            phase,
            batches_processed,
            total_batches,
            chunks_identified,
        });
    }

    fn empty_report(&self, document: &Document, started: Instant) -> ChunkingReport {
        ChunkingReport {
            document_id: document.id.clone(),
            chunks: Vec::new(),
            batch_count: 0,
            fallback_batches: 0,
            split_batches: 0,
            oversized_split: 0,
            invalid_candidates: 0,
            duplicates_removed: 0,
            correction: CorrectionStats::default(),
            verification_mismatches: 0,
            cancelled: false,
            elapsed: started.elapsed(),
        }
    }
}
