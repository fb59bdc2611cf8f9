use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::error::AppError;
use serde_json::json;
use tracing::debug;

use crate::{
    engine::CollisionEngine,
    types::{
        confidence_for, CollisionEvidence, CollisionResult, DetectionInput, EngineType,
    },
};

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub threshold: f32,
    pub limit: usize,
    pub exclude_document_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SimilarChunk {
    pub id: String,
    pub similarity: f32,
    pub importance: Option<f32>,
    pub document_id: String,
}

/// Embedding-index collaborator. The engine only needs ranked nearest
/// neighbors above a threshold; the index itself lives elsewhere.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search_similar(
        &self,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SimilarChunk>, AppError>;
}

pub struct SemanticSimilarityEngine {
    search: Arc<dyn VectorSearch>,
    threshold: f32,
    limit: usize,
    importance_weight: f32,
}

impl SemanticSimilarityEngine {
    pub fn new(search: Arc<dyn VectorSearch>) -> Self {
        Self {
            search,
            threshold: 0.7,
            limit: 50,
            importance_weight: 0.1,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    fn effective_threshold(&self, input: &DetectionInput) -> f32 {
        input
            .config
            .as_ref()
            .and_then(|c| c.get("threshold"))
            .and_then(serde_json::Value::as_f64)
            .map_or(self.threshold, |v| {
                #[allow(clippy::cast_possible_truncation)]
                let v = v as f32;
                v
            })
    }
}

#[async_trait]
impl CollisionEngine for SemanticSimilarityEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::SemanticSimilarity
    }

    fn can_process(&self, input: &DetectionInput) -> bool {
        input
            .source
            .embedding
            .as_ref()
            .is_some_and(|embedding| !embedding.is_empty())
    }

    async fn detect(&self, input: &DetectionInput) -> Result<Vec<CollisionResult>, AppError> {
        let Some(embedding) = input.source.embedding.as_deref() else {
            return Ok(Vec::new());
        };

        let options = SearchOptions {
            threshold: self.effective_threshold(input),
            limit: self.limit,
            exclude_document_id: Some(input.source.document_id.clone()),
        };
        let hits = self.search.search_similar(embedding, &options).await?;
        debug!(hit_count = hits.len(), "vector search returned neighbors");

        let targets: HashMap<&str, &crate::types::ChunkRecord> = input
            .targets
            .iter()
            .map(|target| (target.id.as_str(), target))
            .collect();

        let results = hits
            .into_iter()
            .filter_map(|hit| {
                let target = targets.get(hit.id.as_str())?;
                let importance = hit.importance.unwrap_or(target.metadata.importance);
                let score =
                    (hit.similarity + importance * self.importance_weight).min(1.0);
                Some(CollisionResult {
                    source_chunk_id: input.source.id.clone(),
                    target_chunk_id: hit.id.clone(),
                    engine: EngineType::SemanticSimilarity,
                    score,
                    confidence: confidence_for(score),
                    explanation: Some(format!(
                        "embedding similarity {:.2} with importance boost",
                        hit.similarity
                    )),
                    evidence: CollisionEvidence::Semantic {
                        similarity: hit.similarity,
                    },
                })
            })
            .collect();
        Ok(results)
    }

    fn config_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "threshold": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                "limit": { "type": "integer", "minimum": 1 },
                "importance_weight": { "type": "number", "minimum": 0.0 }
            }
        })
    }
}
