use common::types::CorrectedChunk;
use tracing::debug;

/// Sorts chunks into document order and removes duplicates introduced by the
/// batch overlap. A chunk fully contained in the previously kept span is
/// dropped; a chunk overlapping the previous one by more than `overlap_ratio`
/// of its own length triggers replace-if-better on metadata importance, ties
/// keeping the earlier-seen chunk. Idempotent: running it twice is a no-op.
pub fn dedupe_chunks(
    mut chunks: Vec<CorrectedChunk>,
    overlap_ratio: f32,
) -> (Vec<CorrectedChunk>, usize) {
    chunks.sort_by(|a, b| {
        a.start_offset
            .cmp(&b.start_offset)
            .then(a.end_offset.cmp(&b.end_offset))
    });

    let total = chunks.len();
    let mut kept: Vec<CorrectedChunk> = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let Some(previous) = kept.last() else {
            kept.push(chunk);
            continue;
        };

        // Sorted by start, so containment reduces to the end check.
        if chunk.end_offset <= previous.end_offset {
            continue;
        }

        if overlaps_heavily(previous, &chunk, overlap_ratio) {
            if chunk.metadata.importance > previous.metadata.importance {
                kept.pop();
                kept.push(chunk);
            }
            continue;
        }
        kept.push(chunk);
    }

    let removed = total.saturating_sub(kept.len());
    if removed > 0 {
        debug!(removed, kept = kept.len(), "dropped overlap duplicates");
    }
    (kept, removed)
}

fn overlaps_heavily(previous: &CorrectedChunk, chunk: &CorrectedChunk, overlap_ratio: f32) -> bool {
    let span = chunk.end_offset.saturating_sub(chunk.start_offset).max(1);
    let overlap = previous
        .end_offset
        .min(chunk.end_offset)
        .saturating_sub(chunk.start_offset.max(previous.start_offset));

    #[allow(clippy::cast_precision_loss)]
    let ratio = overlap as f32 / span as f32;
    ratio > overlap_ratio
}

#[cfg(test)]
mod tests {
    use common::types::{ChunkMetadata, MatchConfidence};

    use super::*;

    fn chunk(start: usize, end: usize, importance: f32) -> CorrectedChunk {
        CorrectedChunk {
            content: "x".repeat(end.saturating_sub(start)),
            start_offset: start,
            end_offset: end,
            metadata: ChunkMetadata {
                importance,
                ..ChunkMetadata::default()
            },
            confidence: MatchConfidence::Exact,
            similarity: 100.0,
        }
    }

    #[test]
    fn contained_chunks_are_dropped() {
        let (kept, removed) = dedupe_chunks(
            vec![chunk(0, 100, 0.5), chunk(20, 80, 0.9), chunk(0, 100, 0.5)],
            0.5,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(removed, 2);
        assert_eq!(kept[0].start_offset, 0);
    }

    #[test]
    fn heavy_overlap_replaces_when_importance_is_higher() {
        let (kept, _) = dedupe_chunks(
            vec![chunk(0, 100, 0.3), chunk(10, 110, 0.9)],
            0.5,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].start_offset, 10);
        assert!((kept[0].metadata.importance - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn heavy_overlap_ties_keep_the_earlier_chunk() {
        let (kept, _) = dedupe_chunks(
            vec![chunk(0, 100, 0.5), chunk(10, 110, 0.5)],
            0.5,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].start_offset, 0);
    }

    #[test]
    fn light_overlap_keeps_both() {
        let (kept, removed) = dedupe_chunks(
            vec![chunk(0, 100, 0.5), chunk(80, 300, 0.5)],
            0.5,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(removed, 0);
    }

    #[test]
    fn output_is_sorted_and_idempotent() {
        let input = vec![
            chunk(200, 300, 0.5),
            chunk(0, 100, 0.5),
            chunk(100, 200, 0.5),
        ];
        let (first, removed_first) = dedupe_chunks(input, 0.5);
        assert_eq!(removed_first, 0);
        let starts: Vec<usize> = first.iter().map(|c| c.start_offset).collect();
        assert_eq!(starts, vec![0, 100, 200]);

        let (second, removed_second) = dedupe_chunks(first.clone(), 0.5);
        assert_eq!(second.len(), first.len());
        assert_eq!(removed_second, 0);
    }
}
