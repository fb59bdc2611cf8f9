use common::{
    error::AppError,
    types::{ChunkMetadata, ConceptRef, Document, EmotionalTone, RawChunkCandidate, ValidatedChunk},
};
use tracing::debug;

use crate::{batching::DocumentBatch, pipeline::ChunkingConfig};

/// A candidate the validator refused, with the reason kept for telemetry.
#[derive(Debug)]
pub struct RejectedCandidate {
    pub candidate: RawChunkCandidate,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub valid: Vec<ValidatedChunk>,
    pub oversized: Vec<ValidatedChunk>,
    pub invalid: Vec<RejectedCandidate>,
    /// Count of metadata fields that had to be defaulted (observability).
    pub defaulted_fields: usize,
}

/// Converts batch-relative candidates to absolute document coordinates,
/// rejects structurally broken entries, routes over-cap chunks to the
/// splitter, and normalizes metadata defaults. Strict mode turns defaulting
/// into a hard error.
pub fn validate_candidates(
    candidates: Vec<RawChunkCandidate>,
    batch: &DocumentBatch,
    document: &Document,
    config: &ChunkingConfig,
) -> Result<ValidationOutcome, AppError> {
    let mut outcome = ValidationOutcome::default();

    for candidate in candidates {
        let Some(content) = candidate.content.clone().filter(|c| !c.is_empty()) else {
            outcome.invalid.push(RejectedCandidate {
                candidate,
                reason: "missing content".into(),
            });
            continue;
        };

        let (Some(raw_start), Some(raw_end)) = (candidate.start_offset, candidate.end_offset)
        else {
            outcome.invalid.push(RejectedCandidate {
                candidate,
                reason: "missing offsets".into(),
            });
            continue;
        };

        // Batch-relative to absolute. Negative model offsets clamp to the
        // batch start; the corrector recovers the real position later.
        let rel_start = usize::try_from(raw_start).unwrap_or(0);
        let rel_end = usize::try_from(raw_end).unwrap_or(0);
        let start_offset = batch.start_offset.saturating_add(rel_start);
        let end_offset = batch
            .start_offset
            .saturating_add(rel_end)
            .min(document.len());

        if start_offset >= end_offset {
            outcome.invalid.push(RejectedCandidate {
                candidate,
                reason: format!("inverted offsets ({start_offset} >= {end_offset})"),
            });
            continue;
        }

        let metadata = normalize_metadata(&candidate, config, &mut outcome.defaulted_fields)?;

        let chunk = ValidatedChunk {
            content,
            start_offset,
            end_offset,
            metadata,
        };

        if chunk.content.chars().count() > config.tuning.max_chunk_size {
            outcome.oversized.push(chunk);
        } else {
            outcome.valid.push(chunk);
        }
    }

    debug!(
        batch_id = batch.batch_id,
        valid = outcome.valid.len(),
        oversized = outcome.oversized.len(),
        invalid = outcome.invalid.len(),
        defaulted_fields = outcome.defaulted_fields,
        "candidate validation finished"
    );

    Ok(outcome)
}

fn normalize_metadata(
    candidate: &RawChunkCandidate,
    config: &ChunkingConfig,
    defaulted: &mut usize,
) -> Result<ChunkMetadata, AppError> {
    let mut count_default = |field: &str| -> Result<(), AppError> {
        if config.strict {
            return Err(AppError::Validation(format!(
                "strict validation: missing or invalid metadata field `{field}`"
            )));
        }
        *defaulted = defaulted.saturating_add(1);
        Ok(())
    };

    let themes = match candidate.themes.clone().filter(|t| !t.is_empty()) {
        Some(themes) => themes,
        None => {
            count_default("themes")?;
            vec!["general".to_string()]
        }
    };

    let concepts: Vec<ConceptRef> = match candidate.concepts.clone() {
        Some(concepts) => concepts
            .into_iter()
            .map(|concept| ConceptRef {
                importance: concept.importance.clamp(0.0, 1.0),
                ..concept
            })
            .collect(),
        None => {
            count_default("concepts")?;
            Vec::new()
        }
    };

    let importance = match candidate.importance {
        Some(value) if (0.0..=1.0).contains(&value) => value,
        _ => {
            count_default("importance")?;
            0.5
        }
    };

    let emotional = match candidate.emotional.clone() {
        Some(tone) if tone.is_valid() => tone,
        _ => {
            count_default("emotional")?;
            EmotionalTone::default()
        }
    };

    Ok(ChunkMetadata {
        themes,
        concepts,
        importance,
        summary: candidate.summary.clone(),
        domain: candidate.domain.clone(),
        emotional,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ChunkingTuning;

    fn setup(text: &str) -> (Document, DocumentBatch) {
        let document = Document::new("doc-v", text);
        let batch = DocumentBatch {
            batch_id: 0,
            content: text.to_string(),
            start_offset: 0,
            end_offset: text.len(),
        };
        (document, batch)
    }

    fn candidate(content: &str, start: i64, end: i64) -> RawChunkCandidate {
        RawChunkCandidate {
            content: Some(content.to_string()),
            start_offset: Some(start),
            end_offset: Some(end),
            ..RawChunkCandidate::default()
        }
    }

    fn config(max_chunk_size: usize) -> ChunkingConfig {
        ChunkingConfig {
            tuning: ChunkingTuning {
                max_chunk_size,
                ..ChunkingTuning::default()
            },
            ..ChunkingConfig::default()
        }
    }

    #[test]
    fn missing_content_and_offsets_are_rejected() {
        let (document, batch) = setup("some text here");
        let candidates = vec![
            RawChunkCandidate::default(),
            RawChunkCandidate {
                content: Some("text".into()),
                ..RawChunkCandidate::default()
            },
            candidate("text", 9, 5),
        ];

        let outcome = validate_candidates(candidates, &batch, &document, &config(100))
            .expect("lenient mode never errors");
        assert!(outcome.valid.is_empty());
        assert_eq!(outcome.invalid.len(), 3);
    }

    #[test]
    fn metadata_defaults_are_substituted() {
        let (document, batch) = setup("abcdefghij");
        let mut raw = candidate("abcde", 0, 5);
        raw.importance = Some(7.5); // out of range

        let outcome = validate_candidates(vec![raw], &batch, &document, &config(100))
            .expect("lenient mode never errors");
        let chunk = outcome.valid.first().expect("chunk kept");
        assert_eq!(chunk.metadata.themes, vec!["general".to_string()]);
        assert!((chunk.metadata.importance - 0.5).abs() < f32::EPSILON);
        assert_eq!(chunk.metadata.emotional, EmotionalTone::default());
        assert!(outcome.defaulted_fields >= 3);
    }

    #[test]
    fn strict_mode_rejects_missing_metadata() {
        let (document, batch) = setup("abcdefghij");
        let strict = ChunkingConfig {
            strict: true,
            ..config(100)
        };

        let result = validate_candidates(vec![candidate("abcde", 0, 5)], &batch, &document, &strict);
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn oversized_chunks_are_routed_separately() {
        let text = "x".repeat(50);
        let (document, batch) = setup(&text);
        let outcome = validate_candidates(
            vec![candidate(&text, 0, 50)],
            &batch,
            &document,
            &config(10),
        )
        .expect("validates");
        assert!(outcome.valid.is_empty());
        assert_eq!(outcome.oversized.len(), 1);
    }

    #[test]
    fn offsets_become_absolute_and_clamp_to_document() {
        let text = "0123456789".repeat(10);
        let document = Document::new("doc-v", &text);
        let batch = DocumentBatch {
            batch_id: 1,
            content: text.get(50..).unwrap_or_default().to_string(),
            start_offset: 50,
            end_offset: 100,
        };

        let outcome = validate_candidates(
            vec![candidate("01234", 0, 5), candidate("56789", 45, 500)],
            &batch,
            &document,
            &config(100),
        )
        .expect("validates");
        assert_eq!(outcome.valid.len(), 2);
        assert_eq!(outcome.valid[0].start_offset, 50);
        assert_eq!(outcome.valid[0].end_offset, 55);
        assert_eq!(outcome.valid[1].end_offset, 100, "clamped to document end");
    }
}
