use std::collections::{BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use common::error::AppError;
use regex::Regex;
use serde_json::json;

use crate::{
    engine::CollisionEngine,
    scoring::clamp_unit,
    types::{
        confidence_for, CollisionEvidence, CollisionResult, DetectionInput, EngineType,
    },
};

const PAGERANK_DAMPING: f64 = 0.85;
const PAGERANK_ITERATIONS: usize = 10;

pub struct CitationNetworkEngine {
    author_year: Regex,
    numbered: Regex,
    doi: Regex,
    url: Regex,
}

impl CitationNetworkEngine {
    pub fn new() -> Result<Self, AppError> {
        Ok(Self {
            author_year: compile(r"\(([A-Z][A-Za-z'-]+(?:\s+(?:et al\.|&\s+[A-Z][A-Za-z'-]+))?),?\s+(\d{4})\)")?,
            numbered: compile(r"\[(\d{1,3})\]")?,
            doi: compile(r"\b10\.\d{4,9}/[-._;()/:A-Za-z0-9]+")?,
            url: compile(r"https?://[^\s)>\]]+")?,
        })
    }

    /// Normalized citation identifiers found in a chunk's content.
    fn citations_of(&self, content: &str) -> BTreeSet<String> {
        let mut citations = BTreeSet::new();

        for caps in self.author_year.captures_iter(content) {
            if let (Some(author), Some(year)) = (caps.get(1), caps.get(2)) {
                citations.insert(format!(
                    "{} {}",
                    author.as_str().to_lowercase(),
                    year.as_str()
                ));
            }
        }
        for caps in self.numbered.captures_iter(content) {
            if let Some(number) = caps.get(1) {
                citations.insert(format!("ref:{}", number.as_str()));
            }
        }
        for m in self.doi.find_iter(content) {
            citations.insert(format!("doi:{}", m.as_str().to_lowercase()));
        }
        for m in self.url.find_iter(content) {
            let trimmed = m.as_str().trim_end_matches(['.', ',', ';']);
            citations.insert(format!("url:{}", trimmed.to_lowercase()));
        }
        citations
    }
}

fn compile(pattern: &str) -> Result<Regex, AppError> {
    Regex::new(pattern)
        .map_err(|err| AppError::InternalError(format!("invalid citation pattern: {err}")))
}

/// PageRank over the co-citation graph: citations are nodes, with an edge
/// when two citations appear in the same chunk.
fn pagerank(chunk_citations: &[BTreeSet<String>]) -> HashMap<String, f64> {
    let mut adjacency: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for citations in chunk_citations {
        for a in citations {
            for b in citations {
                if a != b {
                    adjacency.entry(a.as_str()).or_default().insert(b.as_str());
                }
            }
        }
        for citation in citations {
            adjacency.entry(citation.as_str()).or_default();
        }
    }

    let node_count = adjacency.len();
    if node_count == 0 {
        return HashMap::new();
    }
    #[allow(clippy::cast_precision_loss)]
    let n = node_count as f64;

    let mut ranks: HashMap<&str, f64> = adjacency.keys().map(|k| (*k, 1.0 / n)).collect();
    for _ in 0..PAGERANK_ITERATIONS {
        let mut next: HashMap<&str, f64> =
            adjacency.keys().map(|k| (*k, (1.0 - PAGERANK_DAMPING) / n)).collect();
        for (node, neighbors) in &adjacency {
            if neighbors.is_empty() {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let share = ranks.get(node).copied().unwrap_or(0.0) / neighbors.len() as f64;
            for neighbor in neighbors {
                if let Some(rank) = next.get_mut(neighbor) {
                    *rank += PAGERANK_DAMPING * share;
                }
            }
        }
        ranks = next;
    }

    ranks
        .into_iter()
        .map(|(node, rank)| (node.to_string(), rank))
        .collect()
}

/// BFS connected components over chunks that share at least one citation.
/// Returns a cluster id per chunk index.
fn cluster_chunks(chunk_citations: &[BTreeSet<String>]) -> Vec<Option<usize>> {
    let count = chunk_citations.len();
    let mut cluster_of: Vec<Option<usize>> = vec![None; count];
    let mut next_cluster = 0usize;

    for start in 0..count {
        if cluster_of.get(start).copied().flatten().is_some()
            || chunk_citations.get(start).is_none_or(BTreeSet::is_empty)
        {
            continue;
        }

        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            if cluster_of.get(current).copied().flatten().is_some() {
                continue;
            }
            if let Some(slot) = cluster_of.get_mut(current) {
                *slot = Some(next_cluster);
            }
            let Some(current_citations) = chunk_citations.get(current) else {
                continue;
            };
            for (other, other_citations) in chunk_citations.iter().enumerate() {
                if cluster_of.get(other).copied().flatten().is_none()
                    && !other_citations.is_disjoint(current_citations)
                {
                    queue.push_back(other);
                }
            }
        }
        next_cluster = next_cluster.saturating_add(1);
    }
    cluster_of
}

#[async_trait]
impl CollisionEngine for CitationNetworkEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::CitationNetwork
    }

    fn can_process(&self, input: &DetectionInput) -> bool {
        !self.citations_of(&input.source.content).is_empty()
    }

    async fn detect(&self, input: &DetectionInput) -> Result<Vec<CollisionResult>, AppError> {
        let source_citations = self.citations_of(&input.source.content);
        if source_citations.is_empty() {
            return Ok(Vec::new());
        }

        // Index 0 is the source; targets follow in order.
        let mut chunk_citations = vec![source_citations.clone()];
        chunk_citations.extend(
            input
                .targets
                .iter()
                .map(|target| self.citations_of(&target.content)),
        );

        let ranks = pagerank(&chunk_citations);
        let max_rank = ranks.values().copied().fold(0.0f64, f64::max).max(f64::EPSILON);
        let clusters = cluster_chunks(&chunk_citations);
        let source_cluster = clusters.first().copied().flatten();

        let mut results = Vec::new();
        for (index, target) in input.targets.iter().enumerate() {
            let Some(target_citations) = chunk_citations.get(index.saturating_add(1)) else {
                continue;
            };
            if target_citations.is_empty() {
                continue;
            }

            let shared: Vec<String> = source_citations
                .intersection(target_citations)
                .cloned()
                .collect();
            let union_size = source_citations.union(target_citations).count().max(1);

            #[allow(clippy::cast_precision_loss)]
            let coupling = shared.len() as f32 / union_size as f32;

            let direct_bonus = if shared
                .iter()
                .any(|c| c.starts_with("doi:") || c.starts_with("url:"))
            {
                0.2
            } else {
                0.0
            };

            let centrality = if shared.is_empty() {
                0.0
            } else {
                let total: f64 = shared
                    .iter()
                    .map(|c| ranks.get(c).copied().unwrap_or(0.0))
                    .sum();
                #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
                let normalized = (total / (shared.len() as f64 * max_rank)) as f32;
                normalized
            };

            let same_cluster = source_cluster.is_some()
                && clusters.get(index.saturating_add(1)).copied().flatten() == source_cluster;
            let cluster_bonus = if same_cluster { 0.1 } else { 0.0 };

            let score =
                clamp_unit(0.5 * coupling + direct_bonus + 0.2 * centrality + cluster_bonus);
            if shared.is_empty() && !same_cluster {
                continue;
            }

            let evidence_citations: Vec<String> = shared.iter().take(5).cloned().collect();
            results.push(CollisionResult {
                source_chunk_id: input.source.id.clone(),
                target_chunk_id: target.id.clone(),
                engine: EngineType::CitationNetwork,
                score,
                confidence: confidence_for(score),
                explanation: Some(format!(
                    "{} shared citation(s), coupling {coupling:.2}",
                    shared.len()
                )),
                evidence: CollisionEvidence::Citation {
                    shared_citations: evidence_citations,
                    coupling,
                    centrality,
                },
            });
        }
        Ok(results)
    }

    fn config_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "min_shared_citations": { "type": "integer", "minimum": 0 }
            }
        })
    }
}
