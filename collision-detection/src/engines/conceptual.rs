use std::collections::HashMap;

use async_trait::async_trait;
use common::error::AppError;
use serde_json::json;

use crate::{
    engine::CollisionEngine,
    scoring::clamp_unit,
    types::{
        confidence_for, ChunkRecord, CollisionEvidence, CollisionResult, DetectionInput,
        EngineType,
    },
};

/// Lowercased concept text mapped to its importance.
fn concept_map(chunk: &ChunkRecord) -> HashMap<String, f32> {
    chunk
        .metadata
        .concepts
        .iter()
        .map(|concept| (concept.text.to_lowercase(), concept.importance))
        .collect()
}

fn shared_concepts(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> Vec<String> {
    let mut shared: Vec<String> = a.keys().filter(|key| b.contains_key(*key)).cloned().collect();
    shared.sort();
    shared
}

fn jaccard(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let shared = a.keys().filter(|key| b.contains_key(*key)).count();
    let union = a.len().saturating_add(b.len()).saturating_sub(shared).max(1);
    #[allow(clippy::cast_precision_loss)]
    let ratio = shared as f32 / union as f32;
    ratio
}

/// Importance-weighted overlap: shared concepts contribute their smaller
/// importance, the union normalizes by the larger one.
fn weighted_overlap(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    let mut numerator = 0.0f32;
    let mut denominator = 0.0f32;

    for (concept, importance_a) in a {
        match b.get(concept) {
            Some(importance_b) => {
                numerator += importance_a.min(*importance_b);
                denominator += importance_a.max(*importance_b);
            }
            None => denominator += *importance_a,
        }
    }
    for (concept, importance_b) in b {
        if !a.contains_key(concept) {
            denominator += *importance_b;
        }
    }

    if denominator <= f32::EPSILON {
        return 0.0;
    }
    clamp_unit(numerator / denominator)
}

fn result_for(
    input: &DetectionInput,
    target: &ChunkRecord,
    engine: EngineType,
    score: f32,
    explanation: String,
    shared: Vec<String>,
    polarity_gap: Option<f32>,
) -> CollisionResult {
    CollisionResult {
        source_chunk_id: input.source.id.clone(),
        target_chunk_id: target.id.clone(),
        engine,
        score,
        confidence: confidence_for(score),
        explanation: Some(explanation),
        evidence: CollisionEvidence::Conceptual {
            shared_concepts: shared,
            polarity_gap,
        },
    }
}

/// Same concepts, opposite emotional polarity: the chunks likely disagree.
#[derive(Debug, Default)]
pub struct ContradictionEngine;

impl ContradictionEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CollisionEngine for ContradictionEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::Contradiction
    }

    fn can_process(&self, input: &DetectionInput) -> bool {
        !input.source.metadata.concepts.is_empty()
            && input.source.metadata.emotional.polarity.abs() > 0.1
    }

    async fn detect(&self, input: &DetectionInput) -> Result<Vec<CollisionResult>, AppError> {
        let source_concepts = concept_map(&input.source);
        let source_polarity = input.source.metadata.emotional.polarity;

        let mut results = Vec::new();
        for target in &input.targets {
            let target_polarity = target.metadata.emotional.polarity;
            // Contradiction requires genuinely opposed stances.
            if source_polarity * target_polarity >= -0.01 {
                continue;
            }

            let target_concepts = concept_map(target);
            let overlap = jaccard(&source_concepts, &target_concepts);
            if overlap <= f32::EPSILON {
                continue;
            }

            let polarity_gap = (source_polarity - target_polarity).abs() / 2.0;
            let score = clamp_unit(overlap * polarity_gap);
            let shared = shared_concepts(&source_concepts, &target_concepts);
            results.push(result_for(
                input,
                target,
                EngineType::Contradiction,
                score,
                format!(
                    "opposed polarity ({source_polarity:.2} vs {target_polarity:.2}) over {} shared concept(s)",
                    shared.len()
                ),
                shared,
                Some(polarity_gap),
            ));
        }
        Ok(results)
    }

    fn config_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "min_overlap": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
            }
        })
    }
}

/// Chunks written in the same emotional key, regardless of topic.
#[derive(Debug, Default)]
pub struct EmotionalResonanceEngine;

impl EmotionalResonanceEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CollisionEngine for EmotionalResonanceEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::EmotionalResonance
    }

    fn can_process(&self, input: &DetectionInput) -> bool {
        input.source.metadata.emotional.intensity > 0.0
    }

    async fn detect(&self, input: &DetectionInput) -> Result<Vec<CollisionResult>, AppError> {
        let source_tone = &input.source.metadata.emotional;

        let mut results = Vec::new();
        for target in &input.targets {
            let target_tone = &target.metadata.emotional;
            if target_tone.intensity <= 0.0 {
                continue;
            }

            let polarity_gap = (source_tone.polarity - target_tone.polarity).abs() / 2.0;
            let intensity_gap = (source_tone.intensity - target_tone.intensity).abs();
            let mut score = 0.6 * (1.0 - polarity_gap) + 0.4 * (1.0 - intensity_gap);
            if source_tone.primary_emotion == target_tone.primary_emotion {
                score += 0.1;
            }
            let score = clamp_unit(score);

            results.push(result_for(
                input,
                target,
                EngineType::EmotionalResonance,
                score,
                format!(
                    "emotional proximity ({} vs {})",
                    source_tone.primary_emotion, target_tone.primary_emotion
                ),
                Vec::new(),
                Some(polarity_gap),
            ));
        }
        Ok(results)
    }

    fn config_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "min_intensity": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
            }
        })
    }
}

/// Importance-weighted concept overlap: chunks circling the same ideas.
#[derive(Debug, Default)]
pub struct ConceptualDensityEngine;

impl ConceptualDensityEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CollisionEngine for ConceptualDensityEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::ConceptualDensity
    }

    fn can_process(&self, input: &DetectionInput) -> bool {
        !input.source.metadata.concepts.is_empty()
    }

    async fn detect(&self, input: &DetectionInput) -> Result<Vec<CollisionResult>, AppError> {
        let source_concepts = concept_map(&input.source);

        let mut results = Vec::new();
        for target in &input.targets {
            let target_concepts = concept_map(target);
            if target_concepts.is_empty() {
                continue;
            }

            let score = weighted_overlap(&source_concepts, &target_concepts);
            if score <= f32::EPSILON {
                continue;
            }
            let shared = shared_concepts(&source_concepts, &target_concepts);
            results.push(result_for(
                input,
                target,
                EngineType::ConceptualDensity,
                score,
                format!("{} shared concept(s), weighted overlap {score:.2}", shared.len()),
                shared,
                None,
            ));
        }
        Ok(results)
    }

    fn config_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "min_overlap": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
            }
        })
    }
}
