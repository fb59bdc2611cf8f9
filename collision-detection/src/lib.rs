pub mod cache;
pub mod engine;
pub mod engines;
pub mod harness;
pub mod orchestrator;
pub mod scoring;
pub mod types;

pub use cache::{CacheStats, ResultCache};
pub use engine::CollisionEngine;
pub use engines::{
    citation::CitationNetworkEngine,
    conceptual::{ConceptualDensityEngine, ContradictionEngine, EmotionalResonanceEngine},
    semantic::{SearchOptions, SemanticSimilarityEngine, SimilarChunk, VectorSearch},
    structural::StructuralPatternEngine,
    temporal::TemporalProximityEngine,
};
pub use harness::{EngineHarness, EngineMetrics, HarnessConfig};
pub use orchestrator::{
    AggregatedResults, CollisionOrchestrator, OrchestratorConfig, RankedConnection,
};
pub use scoring::{CombineMethod, EngineWeights, NormalizationMethod};
pub use types::{
    ChunkRecord, CollisionEvidence, CollisionResult, DetectionInput, EngineType, SignalConfidence,
};
