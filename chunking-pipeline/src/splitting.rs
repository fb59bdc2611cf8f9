use common::types::{CorrectedChunk, Document, ValidatedChunk};
use regex::Regex;
use tracing::{debug, warn};

/// Deterministically splits an over-cap chunk at natural boundaries, in
/// priority order: paragraph breaks, sentence breaks, word boundaries, hard
/// character cut. Pieces keep exact source bytes and real offsets when the
/// chunk's offsets resolve against the document; otherwise the model's own
/// content is split with the parent's offsets as placeholders for the
/// corrector to fix.
pub fn split_oversized(
    chunk: &ValidatedChunk,
    document: &Document,
    max_size: usize,
) -> Vec<ValidatedChunk> {
    if chunk.content.chars().count() <= max_size {
        return vec![chunk.clone()];
    }

    if let Some(source) = document.slice(chunk.start_offset, chunk.end_offset) {
        let spans = split_spans(source, max_size);
        debug!(
            start_offset = chunk.start_offset,
            end_offset = chunk.end_offset,
            pieces = spans.len(),
            "oversized chunk split against source text"
        );
        return spans
            .iter()
            .enumerate()
            .filter_map(|(index, &(span_start, span_end))| {
                let content = source.get(span_start..span_end)?;
                Some(piece(
                    chunk,
                    content,
                    chunk.start_offset.saturating_add(span_start),
                    chunk.start_offset.saturating_add(span_end),
                    index,
                ))
            })
            .collect();
    }

    // Offset bookkeeping failed upstream; split the model's text instead and
    // defer position recovery to the fuzzy corrector.
    warn!(
        start_offset = chunk.start_offset,
        end_offset = chunk.end_offset,
        "oversized chunk offsets do not resolve; splitting model content with placeholder offsets"
    );
    let spans = split_spans(&chunk.content, max_size);
    spans
        .iter()
        .enumerate()
        .filter_map(|(index, &(span_start, span_end))| {
            let content = chunk.content.get(span_start..span_end)?;
            Some(piece(
                chunk,
                content,
                chunk.start_offset,
                chunk.end_offset,
                index,
            ))
        })
        .collect()
}

/// Re-applies the size cap after offset correction. The anchor and
/// similarity tiers replace a chunk's content with the wider source span
/// they matched, which can push an in-cap chunk back over the limit.
/// Returns the capped chunks and how many had to be re-split.
pub fn resplit_corrected(
    chunks: Vec<CorrectedChunk>,
    document: &Document,
    max_size: usize,
) -> (Vec<CorrectedChunk>, usize) {
    let mut capped = Vec::with_capacity(chunks.len());
    let mut resplit = 0usize;

    for chunk in chunks {
        if chunk.content.chars().count() <= max_size {
            capped.push(chunk);
            continue;
        }
        resplit = resplit.saturating_add(1);
        debug!(
            start_offset = chunk.start_offset,
            end_offset = chunk.end_offset,
            confidence = ?chunk.confidence,
            "corrected chunk grew past the size cap; re-splitting"
        );

        let confidence = chunk.confidence;
        let similarity = chunk.similarity;
        let parent = ValidatedChunk {
            content: chunk.content,
            start_offset: chunk.start_offset,
            end_offset: chunk.end_offset,
            metadata: chunk.metadata,
        };
        for part in split_oversized(&parent, document, max_size) {
            capped.push(CorrectedChunk {
                content: part.content,
                start_offset: part.start_offset,
                end_offset: part.end_offset,
                metadata: part.metadata,
                confidence,
                similarity,
            });
        }
    }
    (capped, resplit)
}

fn piece(
    parent: &ValidatedChunk,
    content: &str,
    start_offset: usize,
    end_offset: usize,
    index: usize,
) -> ValidatedChunk {
    let part = index.saturating_add(1);
    let mut metadata = parent.metadata.clone();
    metadata.summary = Some(match &parent.metadata.summary {
        Some(summary) => format!("{summary} (part {part})"),
        None => format!("(part {part})"),
    });

    ValidatedChunk {
        content: content.to_string(),
        start_offset,
        end_offset,
        metadata,
    }
}

/// Byte spans covering `text`, each at most `max_chars` characters.
fn split_spans(text: &str, max_chars: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    split_level(text, 0, max_chars.max(1), 0, &mut spans);
    spans
}

fn split_level(
    text: &str,
    base: usize,
    max_chars: usize,
    level: usize,
    out: &mut Vec<(usize, usize)>,
) {
    if text.is_empty() {
        return;
    }
    if text.chars().count() <= max_chars {
        out.push((base, base.saturating_add(text.len())));
        return;
    }
    if level >= 3 {
        hard_chop(text, base, max_chars, out);
        return;
    }

    let mut positions = boundary_positions(text, level);
    positions.retain(|p| *p > 0 && *p < text.len());
    positions.dedup();
    if positions.is_empty() {
        split_level(text, base, max_chars, level.saturating_add(1), out);
        return;
    }

    let mut segment_bounds = Vec::with_capacity(positions.len().saturating_add(1));
    let mut prev = 0usize;
    for pos in positions {
        segment_bounds.push((prev, pos));
        prev = pos;
    }
    segment_bounds.push((prev, text.len()));

    let mut group_start = 0usize;
    let mut group_chars = 0usize;
    for (seg_start, seg_end) in segment_bounds {
        let segment = text.get(seg_start..seg_end).unwrap_or_default();
        let seg_chars = segment.chars().count();

        if seg_chars > max_chars {
            if group_chars > 0 {
                out.push((base.saturating_add(group_start), base.saturating_add(seg_start)));
            }
            split_level(
                segment,
                base.saturating_add(seg_start),
                max_chars,
                level.saturating_add(1),
                out,
            );
            group_chars = 0;
            continue;
        }

        if group_chars == 0 {
            group_start = seg_start;
            group_chars = seg_chars;
        } else if group_chars.saturating_add(seg_chars) > max_chars {
            out.push((base.saturating_add(group_start), base.saturating_add(seg_start)));
            group_start = seg_start;
            group_chars = seg_chars;
        } else {
            group_chars = group_chars.saturating_add(seg_chars);
        }
    }
    if group_chars > 0 {
        out.push((base.saturating_add(group_start), base.saturating_add(text.len())));
    }
}

/// Positions just after a boundary of the given priority level.
fn boundary_positions(text: &str, level: usize) -> Vec<usize> {
    match level {
        0 => match Regex::new(r"\n{2,}") {
            Ok(paragraphs) => paragraphs.find_iter(text).map(|m| m.end()).collect(),
            Err(_) => Vec::new(),
        },
        1 => text
            .match_indices(". ")
            .map(|(pos, matched)| pos.saturating_add(matched.len()))
            .collect(),
        _ => text
            .char_indices()
            .filter(|(_, ch)| ch.is_whitespace())
            .map(|(pos, ch)| pos.saturating_add(ch.len_utf8()))
            .collect(),
    }
}

fn hard_chop(text: &str, base: usize, max_chars: usize, out: &mut Vec<(usize, usize)>) {
    let mut start = 0usize;
    let mut count = 0usize;
    for (pos, _) in text.char_indices() {
        if count == max_chars {
            out.push((base.saturating_add(start), base.saturating_add(pos)));
            start = pos;
            count = 0;
        }
        count = count.saturating_add(1);
    }
    if start < text.len() {
        out.push((base.saturating_add(start), base.saturating_add(text.len())));
    }
}

#[cfg(test)]
mod tests {
    use common::types::{ChunkMetadata, MatchConfidence};

    use super::*;

    fn chunk_for(document: &Document, start: usize, end: usize) -> ValidatedChunk {
        let content = document.slice(start, end).unwrap_or_default().to_string();
        ValidatedChunk {
            content,
            start_offset: start,
            end_offset: end,
            metadata: ChunkMetadata {
                themes: vec!["history".into()],
                importance: 0.8,
                summary: Some("overview".into()),
                ..ChunkMetadata::default()
            },
        }
    }

    #[test]
    fn splits_at_paragraph_boundaries_with_exact_offsets() {
        let text = format!(
            "{}\n\n{}\n\n{}",
            "First paragraph. ".repeat(10),
            "Second paragraph. ".repeat(10),
            "Third paragraph. ".repeat(10)
        );
        let document = Document::new("doc-s", &text);
        let chunk = chunk_for(&document, 0, text.len());

        let pieces = split_oversized(&chunk, &document, 250);
        assert!(pieces.len() >= 2);
        for piece in &pieces {
            assert!(piece.content.chars().count() <= 250);
            assert_eq!(
                document.slice(piece.start_offset, piece.end_offset),
                Some(piece.content.as_str()),
                "piece offsets must be byte-exact"
            );
        }
        // Pieces tile the parent span completely.
        let rebuilt: String = pieces.iter().map(|p| p.content.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn falls_back_to_sentence_and_word_boundaries() {
        let text = "No paragraph breaks here. Just sentences. ".repeat(20);
        let document = Document::new("doc-s", &text);
        let chunk = chunk_for(&document, 0, text.len());

        let pieces = split_oversized(&chunk, &document, 100);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.content.chars().count() <= 100);
        }
    }

    #[test]
    fn unbroken_text_is_hard_chopped_under_the_cap() {
        let text = "x".repeat(500);
        let document = Document::new("doc-s", &text);
        let chunk = chunk_for(&document, 0, text.len());

        let pieces = split_oversized(&chunk, &document, 64);
        assert!(!pieces.is_empty());
        for piece in &pieces {
            assert!(piece.content.chars().count() <= 64);
        }
        let rebuilt: String = pieces.iter().map(|p| p.content.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn pieces_inherit_metadata_with_part_annotation() {
        let text = "Sentence one is here. ".repeat(30);
        let document = Document::new("doc-s", &text);
        let chunk = chunk_for(&document, 0, text.len());

        let pieces = split_oversized(&chunk, &document, 120);
        for (index, piece) in pieces.iter().enumerate() {
            assert_eq!(piece.metadata.themes, vec!["history".to_string()]);
            assert!((piece.metadata.importance - 0.8).abs() < f32::EPSILON);
            let expected = format!("overview (part {})", index + 1);
            assert_eq!(piece.metadata.summary.as_deref(), Some(expected.as_str()));
        }
    }

    #[test]
    fn unresolvable_offsets_split_model_content_with_placeholders() {
        let document = Document::new("doc-s", "short document");
        let chunk = ValidatedChunk {
            content: "completely different text. ".repeat(20),
            // Range does not resolve inside the document.
            start_offset: 5,
            end_offset: 11,
            metadata: ChunkMetadata::default(),
        };

        // end > document.len() forces the placeholder path.
        let broken = ValidatedChunk {
            end_offset: 4_000,
            ..chunk
        };
        let pieces = split_oversized(&broken, &document, 100);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert_eq!(piece.start_offset, 5);
            assert_eq!(piece.end_offset, 4_000);
        }
    }

    #[test]
    fn resplit_reapplies_the_cap_to_widened_corrections() {
        let text = "Words of source text here. ".repeat(20);
        let document = Document::new("doc-s", &text);
        let widened = CorrectedChunk {
            content: text.clone(),
            start_offset: 0,
            end_offset: text.len(),
            metadata: ChunkMetadata::default(),
            confidence: MatchConfidence::Approximate,
            similarity: 62.0,
        };

        let (capped, resplit) = resplit_corrected(vec![widened], &document, 150);
        assert_eq!(resplit, 1);
        assert!(capped.len() > 1);
        for chunk in &capped {
            assert!(chunk.content.chars().count() <= 150);
            assert_eq!(chunk.confidence, MatchConfidence::Approximate);
            assert_eq!(
                document.slice(chunk.start_offset, chunk.end_offset),
                Some(chunk.content.as_str())
            );
        }
    }

    #[test]
    fn resplit_leaves_in_cap_chunks_untouched() {
        let document = Document::new("doc-s", "short source text");
        let chunk = CorrectedChunk {
            content: "short source".into(),
            start_offset: 0,
            end_offset: 12,
            metadata: ChunkMetadata::default(),
            confidence: MatchConfidence::Exact,
            similarity: 100.0,
        };

        let (capped, resplit) = resplit_corrected(vec![chunk], &document, 100);
        assert_eq!(resplit, 0);
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].content, "short source");
    }

    #[test]
    fn under_cap_chunk_is_returned_unchanged() {
        let document = Document::new("doc-s", "small text");
        let chunk = chunk_for(&document, 0, 10);
        let pieces = split_oversized(&chunk, &document, 1_000);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].content, chunk.content);
    }
}
