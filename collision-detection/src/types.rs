use chrono::{DateTime, Utc};
use common::{storage::StoredConnection, types::ChunkMetadata};
use serde::{Deserialize, Serialize};

/// The detection families the orchestrator knows how to weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineType {
    SemanticSimilarity,
    StructuralPattern,
    TemporalProximity,
    CitationNetwork,
    Contradiction,
    EmotionalResonance,
    ConceptualDensity,
}

impl EngineType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SemanticSimilarity => "semantic_similarity",
            Self::StructuralPattern => "structural_pattern",
            Self::TemporalProximity => "temporal_proximity",
            Self::CitationNetwork => "citation_network",
            Self::Contradiction => "contradiction",
            Self::EmotionalResonance => "emotional_resonance",
            Self::ConceptualDensity => "conceptual_density",
        }
    }
}

/// The persisted-chunk view engines consume. Embeddings and timestamps are
/// optional; each engine declares what it needs via `can_process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    /// Explicit event time, when known. Falls back to content-extracted
    /// dates in the temporal engine.
    pub timestamp: Option<DateTime<Utc>>,
}

/// One detection request: a source chunk compared against candidate targets.
#[derive(Debug, Clone)]
pub struct DetectionInput {
    pub source: ChunkRecord,
    pub targets: Vec<ChunkRecord>,
    /// Per-call overrides, validated against the engine's config schema.
    pub config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalConfidence {
    High,
    Medium,
    Low,
}

/// Machine-readable justification for a collision, one variant per engine
/// family. Closed on purpose: downstream consumers match exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollisionEvidence {
    Semantic {
        similarity: f32,
    },
    Structural {
        matching_features: Vec<String>,
        feature_similarity: f32,
    },
    Temporal {
        gap_seconds: i64,
        periodic: bool,
    },
    Citation {
        shared_citations: Vec<String>,
        coupling: f32,
        centrality: f32,
    },
    Conceptual {
        shared_concepts: Vec<String>,
        polarity_gap: Option<f32>,
    },
}

/// One scored connection emitted by an engine. Scores are always in [0, 1];
/// the harness clamps defensively on the way out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollisionResult {
    pub source_chunk_id: String,
    pub target_chunk_id: String,
    pub engine: EngineType,
    pub score: f32,
    pub confidence: SignalConfidence,
    pub explanation: Option<String>,
    pub evidence: CollisionEvidence,
}

impl CollisionResult {
    pub fn to_stored(&self) -> StoredConnection {
        StoredConnection {
            source_chunk_id: self.source_chunk_id.clone(),
            target_chunk_id: self.target_chunk_id.clone(),
            engine: self.engine.as_str().to_string(),
            score: self.score,
            explanation: self.explanation.clone(),
            detected_at: Utc::now(),
        }
    }
}

/// Confidence tiers shared by the similarity-flavored engines.
pub fn confidence_for(score: f32) -> SignalConfidence {
    if score >= 0.85 {
        SignalConfidence::High
    } else if score >= 0.75 {
        SignalConfidence::Medium
    } else {
        SignalConfidence::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_type_serializes_snake_case() {
        let json = serde_json::to_string(&EngineType::SemanticSimilarity).expect("serializes");
        assert_eq!(json, "\"semantic_similarity\"");
        assert_eq!(EngineType::CitationNetwork.as_str(), "citation_network");
    }

    #[test]
    fn evidence_is_tagged_by_kind() {
        let evidence = CollisionEvidence::Temporal {
            gap_seconds: 3600,
            periodic: false,
        };
        let json = serde_json::to_value(&evidence).expect("serializes");
        assert_eq!(json["kind"], "temporal");
        assert_eq!(json["gap_seconds"], 3600);
    }

    #[test]
    fn confidence_tiers_follow_thresholds() {
        assert_eq!(confidence_for(0.9), SignalConfidence::High);
        assert_eq!(confidence_for(0.8), SignalConfidence::Medium);
        assert_eq!(confidence_for(0.5), SignalConfidence::Low);
    }
}
