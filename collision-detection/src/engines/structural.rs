use async_trait::async_trait;
use common::error::AppError;
use regex::Regex;
use serde_json::json;

use crate::{
    engine::CollisionEngine,
    scoring::clamp_unit,
    types::{
        confidence_for, ChunkRecord, CollisionEvidence, CollisionResult, DetectionInput,
        EngineType,
    },
};

/// Markdown shape of a chunk, reduced to the features that indicate two
/// chunks were written in the same register.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    heading_levels: Vec<usize>,
    list_items: usize,
    table_rows: usize,
    code_fences: usize,
    blockquotes: usize,
    paragraphs: usize,
    nesting_depth: usize,
}

impl Fingerprint {
    fn has_headings(&self) -> bool {
        !self.heading_levels.is_empty()
    }
}

pub struct StructuralPatternEngine {
    heading: Regex,
    list_item: Regex,
    table_row: Regex,
    code_fence: Regex,
    blockquote: Regex,
    /// Enables the near-match boost when most features are close but not
    /// identical.
    fuzzy_matching: bool,
}

impl StructuralPatternEngine {
    pub fn new() -> Result<Self, AppError> {
        Ok(Self {
            heading: compile(r"(?m)^(#{1,6})\s+\S")?,
            list_item: compile(r"(?m)^(\s*)([-*+]|\d+\.)\s+\S")?,
            table_row: compile(r"(?m)^\|.*\|\s*$")?,
            code_fence: compile(r"(?m)^```")?,
            blockquote: compile(r"(?m)^>\s?")?,
            fuzzy_matching: true,
        })
    }

    fn fingerprint(&self, chunk: &ChunkRecord) -> Fingerprint {
        let content = &chunk.content;

        let heading_levels: Vec<usize> = self
            .heading
            .captures_iter(content)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().len()))
            .collect();

        let mut list_items = 0usize;
        let mut max_indent = 0usize;
        for caps in self.list_item.captures_iter(content) {
            list_items = list_items.saturating_add(1);
            let indent = caps.get(1).map_or(0, |m| m.as_str().len());
            max_indent = max_indent.max(indent);
        }

        Fingerprint {
            heading_levels,
            list_items,
            table_rows: self.table_row.find_iter(content).count(),
            code_fences: self.code_fence.find_iter(content).count() / 2,
            blockquotes: self.blockquote.find_iter(content).count(),
            paragraphs: content
                .split("\n\n")
                .filter(|p| !p.trim().is_empty())
                .count(),
            nesting_depth: max_indent / 2,
        }
    }

    fn compare(&self, a: &Fingerprint, b: &Fingerprint) -> (f32, Vec<String>) {
        let mut score = 0.0f32;
        let mut matching = Vec::new();
        let mut near_matches = 0usize;

        let boolean_features: [(&str, bool, bool, usize, usize, f32); 5] = [
            (
                "headings",
                a.has_headings(),
                b.has_headings(),
                a.heading_levels.len(),
                b.heading_levels.len(),
                0.15,
            ),
            ("lists", a.list_items > 0, b.list_items > 0, a.list_items, b.list_items, 0.10),
            ("tables", a.table_rows > 0, b.table_rows > 0, a.table_rows, b.table_rows, 0.10),
            (
                "code",
                a.code_fences > 0,
                b.code_fences > 0,
                a.code_fences,
                b.code_fences,
                0.15,
            ),
            (
                "blockquotes",
                a.blockquotes > 0,
                b.blockquotes > 0,
                a.blockquotes,
                b.blockquotes,
                0.10,
            ),
        ];

        for (name, in_a, in_b, count_a, count_b, weight) in boolean_features {
            if in_a == in_b {
                score += weight;
                if in_a {
                    matching.push(name.to_string());
                }
                if in_a && count_a != count_b {
                    near_matches = near_matches.saturating_add(1);
                }
            }
        }

        let heading_similarity =
            sequence_similarity(&a.heading_levels, &b.heading_levels);
        score += heading_similarity * 0.20;
        if heading_similarity >= 0.8 && a.has_headings() {
            matching.push("heading_hierarchy".to_string());
        }

        score += count_closeness(a.paragraphs, b.paragraphs) * 0.10;
        score += count_closeness(a.nesting_depth, b.nesting_depth) * 0.10;

        // Most features close but not byte-identical still indicates a
        // shared authoring pattern.
        if self.fuzzy_matching && near_matches * 5 >= boolean_features.len() * 3 {
            score += 0.10;
        }

        (clamp_unit(score), matching)
    }
}

fn compile(pattern: &str) -> Result<Regex, AppError> {
    Regex::new(pattern)
        .map_err(|err| AppError::InternalError(format!("invalid structural pattern: {err}")))
}

/// Edit-distance similarity between two heading-level sequences.
fn sequence_similarity(a: &[usize], b: &[usize]) -> f32 {
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len().saturating_add(1)];
    for (i, &va) in a.iter().enumerate() {
        if let Some(slot) = current.first_mut() {
            *slot = i.saturating_add(1);
        }
        for (j, &vb) in b.iter().enumerate() {
            let substitution = previous
                .get(j)
                .copied()
                .unwrap_or(usize::MAX)
                .saturating_add(usize::from(va != vb));
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
    let distance = previous.last().copied().unwrap_or(0);

    #[allow(clippy::cast_precision_loss)]
    let similarity = 1.0 - distance as f32 / max_len as f32;
    clamp_unit(similarity)
}

fn count_closeness(a: usize, b: usize) -> f32 {
    let max = a.max(b);
    if max == 0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let closeness = 1.0 - a.abs_diff(b) as f32 / max as f32;
    closeness
}

#[async_trait]
impl CollisionEngine for StructuralPatternEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::StructuralPattern
    }

    fn can_process(&self, input: &DetectionInput) -> bool {
        !input.source.content.trim().is_empty()
    }

    async fn detect(&self, input: &DetectionInput) -> Result<Vec<CollisionResult>, AppError> {
        let source_print = self.fingerprint(&input.source);

        let results = input
            .targets
            .iter()
            .filter(|target| !target.content.trim().is_empty())
            .map(|target| {
                let target_print = self.fingerprint(target);
                let (score, matching_features) = self.compare(&source_print, &target_print);
                CollisionResult {
                    source_chunk_id: input.source.id.clone(),
                    target_chunk_id: target.id.clone(),
                    engine: EngineType::StructuralPattern,
                    score,
                    confidence: confidence_for(score),
                    explanation: Some(format!(
                        "shared structure: {}",
                        if matching_features.is_empty() {
                            "none".to_string()
                        } else {
                            matching_features.join(", ")
                        }
                    )),
                    evidence: CollisionEvidence::Structural {
                        matching_features,
                        feature_similarity: score,
                    },
                }
            })
            .collect();
        Ok(results)
    }

    fn config_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "fuzzy_matching": { "type": "boolean" }
            }
        })
    }
}
