use common::{
    error::AppError,
    types::{CorrectedChunk, Document, MatchConfidence, ValidatedChunk},
};
use regex::Regex;
use tracing::{debug, warn};

use crate::pipeline::ChunkingTuning;

/// Anchor length for the boundary-anchor tier, in characters.
const ANCHOR_CHARS: usize = 100;
/// Similarity comparisons are capped to this many characters per side to
/// bound the Levenshtein cost on 10k-character chunks.
const SIMILARITY_CAP_CHARS: usize = 500;
/// Normalized-regex matching is skipped for chunks with more tokens than
/// this; the anchor tier handles long chunks at a fraction of the cost.
const MAX_PATTERN_TOKENS: usize = 400;

#[derive(Debug, Default, Clone, Copy)]
pub struct CorrectionStats {
    pub exact: usize,
    pub fuzzy: usize,
    pub approximate: usize,
    pub failed: usize,
}

impl CorrectionStats {
    pub fn total(&self) -> usize {
        self.exact
            .saturating_add(self.fuzzy)
            .saturating_add(self.approximate)
            .saturating_add(self.failed)
    }

    pub fn merge(&mut self, other: &CorrectionStats) {
        self.exact = self.exact.saturating_add(other.exact);
        self.fuzzy = self.fuzzy.saturating_add(other.fuzzy);
        self.approximate = self.approximate.saturating_add(other.approximate);
        self.failed = self.failed.saturating_add(other.failed);
    }
}

/// Reconciles model-reported chunk text against the authoritative source via
/// a 4-tier strategy: exact search, whitespace/heading-normalized regex,
/// boundary anchors, sliding-window similarity. The search cursor only
/// advances forward; chunks arrive in document order, which bounds the
/// worst-case search cost.
#[derive(Debug, Default)]
pub struct OffsetCorrector {
    cursor: usize,
}

impl OffsetCorrector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn correct(
        &mut self,
        document: &Document,
        chunks: Vec<ValidatedChunk>,
        tuning: &ChunkingTuning,
    ) -> (Vec<CorrectedChunk>, CorrectionStats) {
        let mut stats = CorrectionStats::default();
        let mut corrected = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            corrected.push(self.correct_one(document, chunk, tuning, &mut stats));
        }

        debug!(
            document_id = %document.id,
            exact = stats.exact,
            fuzzy = stats.fuzzy,
            approximate = stats.approximate,
            failed = stats.failed,
            "offset correction pass finished"
        );
        (corrected, stats)
    }

    fn correct_one(
        &mut self,
        document: &Document,
        chunk: ValidatedChunk,
        tuning: &ChunkingTuning,
        stats: &mut CorrectionStats,
    ) -> CorrectedChunk {
        if let Some(found) = self.find_exact(document, &chunk.content) {
            stats.exact = stats.exact.saturating_add(1);
            // Cursor moves past the match so repeated text cannot pull later
            // chunks backwards onto an earlier occurrence. Overlap duplicates
            // consequently fail every tier, keep their validated offsets and
            // are collapsed by offset dedup downstream.
            self.cursor = found.1;
            return rebuilt(document, chunk, found, MatchConfidence::Exact, 100.0);
        }

        if let Some(found) = self.find_normalized(document, &chunk.content) {
            stats.fuzzy = stats.fuzzy.saturating_add(1);
            self.cursor = found.1;
            let similarity = span_similarity(document, found, &chunk.content);
            return rebuilt(document, chunk, found, MatchConfidence::Fuzzy, similarity);
        }

        if let Some(found) = self.find_anchored(document, &chunk.content, tuning) {
            stats.approximate = stats.approximate.saturating_add(1);
            self.cursor = found.1;
            let similarity = span_similarity(document, found, &chunk.content);
            return rebuilt(
                document,
                chunk,
                found,
                MatchConfidence::Approximate,
                similarity,
            );
        }

        if let Some((found, similarity)) = self.find_by_similarity(document, &chunk.content, tuning)
        {
            stats.approximate = stats.approximate.saturating_add(1);
            self.cursor = found.1;
            return rebuilt(
                document,
                chunk,
                found,
                MatchConfidence::Approximate,
                similarity,
            );
        }

        // No tier matched; keep the original (likely wrong) offsets so the
        // chunk is not lost, and make the degradation visible.
        warn!(
            document_id = %document.id,
            start_offset = chunk.start_offset,
            end_offset = chunk.end_offset,
            "offset correction failed for chunk; keeping model-reported offsets"
        );
        stats.failed = stats.failed.saturating_add(1);
        CorrectedChunk::from_validated(chunk, MatchConfidence::Approximate, 0.0)
    }

    /// Tier 1: verbatim substring search from the cursor.
    fn find_exact(&self, document: &Document, content: &str) -> Option<(usize, usize)> {
        let haystack = document.text.get(self.cursor..)?;
        let pos = haystack.find(content)?;
        let start = self.cursor.saturating_add(pos);
        Some((start, start.saturating_add(content.len())))
    }

    /// Tier 2: whitespace-collapsed, heading-marker-tolerant regex search.
    fn find_normalized(&self, document: &Document, content: &str) -> Option<(usize, usize)> {
        let pattern = normalized_pattern(content)?;
        let haystack = document.text.get(self.cursor..)?;
        let found = pattern.find(haystack)?;
        Some((
            self.cursor.saturating_add(found.start()),
            self.cursor.saturating_add(found.end()),
        ))
    }

    /// Tier 3: locate the chunk's first and last `ANCHOR_CHARS` characters
    /// independently inside a bounded forward window and take the span.
    fn find_anchored(
        &self,
        document: &Document,
        content: &str,
        tuning: &ChunkingTuning,
    ) -> Option<(usize, usize)> {
        if content.chars().count() <= ANCHOR_CHARS.saturating_mul(2) {
            return None;
        }
        let head = char_prefix(content, ANCHOR_CHARS);
        let tail = char_suffix(content, ANCHOR_CHARS);

        let window = self.forward_window(document, content.len(), tuning)?;
        let head_pos = window.find(head)?;
        let after_head = window.get(head_pos.saturating_add(head.len())..)?;
        let tail_pos = after_head.find(tail)?;

        let start = self.cursor.saturating_add(head_pos);
        let end = start
            .saturating_add(head.len())
            .saturating_add(tail_pos)
            .saturating_add(tail.len());

        // Reject spans wildly longer than the content; that means the tail
        // anchor matched a different occurrence.
        if end.saturating_sub(start) > content.len().saturating_mul(2).saturating_add(200) {
            return None;
        }
        Some((start, end))
    }

    /// Tier 4: slide a content-sized window forward and keep the best
    /// Levenshtein similarity at or above the acceptance floor.
    fn find_by_similarity(
        &self,
        document: &Document,
        content: &str,
        tuning: &ChunkingTuning,
    ) -> Option<((usize, usize), f32)> {
        let window = self.forward_window(document, content.len(), tuning)?;
        if window.len() < content.len() {
            return None;
        }

        let step = (content.len() / 20).max(1);
        let mut best: Option<((usize, usize), f32)> = None;
        let mut pos = 0usize;

        while pos.saturating_add(content.len()) <= window.len() {
            let candidate_start = floor_boundary(window, pos);
            let candidate_end = floor_boundary(
                window,
                candidate_start.saturating_add(content.len()).min(window.len()),
            );
            if let Some(candidate) = window.get(candidate_start..candidate_end) {
                let similarity = similarity_pct(content, candidate);
                if best.is_none_or(|(_, s)| similarity > s) {
                    let abs = (
                        self.cursor.saturating_add(candidate_start),
                        self.cursor.saturating_add(candidate_end),
                    );
                    best = Some((abs, similarity));
                }
                if similarity >= tuning.similarity_early_exit_pct {
                    break;
                }
            }
            pos = pos.saturating_add(step);
        }

        best.filter(|(_, similarity)| *similarity >= tuning.similarity_accept_pct)
    }

    fn forward_window<'doc>(
        &self,
        document: &'doc Document,
        content_len: usize,
        tuning: &ChunkingTuning,
    ) -> Option<&'doc str> {
        let end = self
            .cursor
            .saturating_add(content_len.saturating_mul(2))
            .saturating_add(tuning.correction_window)
            .min(document.len());
        let end = document.floor_char_boundary(end);
        document.text.get(self.cursor..end)
    }
}

fn rebuilt(
    document: &Document,
    chunk: ValidatedChunk,
    span: (usize, usize),
    confidence: MatchConfidence,
    similarity: f32,
) -> CorrectedChunk {
    let (start, end) = span;
    let content = document
        .slice(start, end)
        .map_or(chunk.content.clone(), str::to_string);
    CorrectedChunk {
        content,
        start_offset: start,
        end_offset: end,
        metadata: chunk.metadata,
        confidence,
        similarity,
    }
}

fn span_similarity(document: &Document, span: (usize, usize), content: &str) -> f32 {
    document
        .slice(span.0, span.1)
        .map_or(0.0, |slice| similarity_pct(content, slice))
}

/// Builds a regex that collapses whitespace runs and tolerates differing
/// heading markers. Skipped for very long chunks.
fn normalized_pattern(content: &str) -> Option<Regex> {
    let tokens: Vec<&str> = content.split_whitespace().collect();
    if tokens.is_empty() || tokens.len() > MAX_PATTERN_TOKENS {
        return None;
    }

    let parts: Vec<String> = tokens
        .iter()
        .map(|token| {
            if token.chars().all(|ch| ch == '#') {
                "#{1,6}".to_string()
            } else {
                regex::escape(token)
            }
        })
        .collect();

    Regex::new(&parts.join(r"\s+")).ok()
}

fn char_prefix(text: &str, chars: usize) -> &str {
    match text.char_indices().nth(chars) {
        Some((pos, _)) => text.get(..pos).unwrap_or(text),
        None => text,
    }
}

fn char_suffix(text: &str, chars: usize) -> &str {
    let total = text.chars().count();
    if total <= chars {
        return text;
    }
    match text.char_indices().nth(total.saturating_sub(chars)) {
        Some((pos, _)) => text.get(pos..).unwrap_or(text),
        None => text,
    }
}

fn floor_boundary(text: &str, offset: usize) -> usize {
    let mut at = offset.min(text.len());
    while at > 0 && !text.is_char_boundary(at) {
        at = at.saturating_sub(1);
    }
    at
}

/// Levenshtein similarity in percent, capped to the first
/// `SIMILARITY_CAP_CHARS` characters per side.
pub fn similarity_pct(a: &str, b: &str) -> f32 {
    let a_chars: Vec<char> = a.chars().take(SIMILARITY_CAP_CHARS).collect();
    let b_chars: Vec<char> = b.chars().take(SIMILARITY_CAP_CHARS).collect();
    let max_len = a_chars.len().max(b_chars.len());
    if max_len == 0 {
        return 100.0;
    }

    let distance = levenshtein(&a_chars, &b_chars);
    #[allow(clippy::cast_precision_loss)]
    let ratio = 1.0 - (distance as f32 / max_len as f32);
    (ratio * 100.0).clamp(0.0, 100.0)
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len().saturating_add(1)];

    for (i, &ca) in a.iter().enumerate() {
        if let Some(slot) = current.first_mut() {
            *slot = i.saturating_add(1);
        }
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous
                .get(j)
                .copied()
                .unwrap_or(usize::MAX)
                .saturating_add(usize::from(ca != cb));
            let deletion = previous
                .get(j.saturating_add(1))
                .copied()
                .unwrap_or(usize::MAX)
                .saturating_add(1);
            let insertion = current.get(j).copied().unwrap_or(usize::MAX).saturating_add(1);
            if let Some(slot) = current.get_mut(j.saturating_add(1)) {
                *slot = substitution.min(deletion).min(insertion);
            }
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous.last().copied().unwrap_or(0)
}

/// Independent post-correction check: the slice at each chunk's offsets must
/// approximately match its content (length within 30%, shared 50-char
/// prefix). Systemic failure means source and model output diverged beyond
/// safe reconciliation and must abort the run rather than ship corrupted
/// offsets.
pub fn verify_offsets(
    document: &Document,
    chunks: &[CorrectedChunk],
    failure_threshold: f32,
) -> Result<usize, AppError> {
    if chunks.is_empty() {
        return Ok(0);
    }

    let mut mismatches = 0usize;
    for chunk in chunks {
        let Some(slice) = document.slice(chunk.start_offset, chunk.end_offset) else {
            mismatches = mismatches.saturating_add(1);
            continue;
        };

        let slice_len = slice.chars().count();
        let content_len = chunk.content.chars().count().max(1);
        let len_drift = slice_len.abs_diff(content_len);
        #[allow(clippy::cast_precision_loss)]
        let drift_ratio = len_drift as f32 / content_len as f32;

        let prefix_matches = char_prefix(slice, 50) == char_prefix(&chunk.content, 50);
        if drift_ratio > 0.3 || !prefix_matches {
            mismatches = mismatches.saturating_add(1);
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let failure_ratio = mismatches as f32 / chunks.len() as f32;
    if failure_ratio > failure_threshold {
        return Err(AppError::OffsetReconciliation(format!(
            "{mismatches} of {} chunks failed offset verification ({:.0}% > {:.0}% threshold)",
            chunks.len(),
            failure_ratio * 100.0,
            failure_threshold * 100.0
        )));
    }

    Ok(mismatches)
}
