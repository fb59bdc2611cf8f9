use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::error::AppError;
use futures::{stream, StreamExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, instrument, warn};

use crate::{
    cache::{CacheStats, ResultCache},
    harness::{EngineHarness, EngineMetrics},
    scoring::{combine_scores, normalize_scores, CombineMethod, EngineWeights, NormalizationMethod},
    types::{CollisionResult, DetectionInput, EngineType},
};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub parallel: bool,
    pub max_concurrency: usize,
    pub global_timeout: Duration,
    pub weights: EngineWeights,
    pub normalization: NormalizationMethod,
    pub combine: CombineMethod,
    /// Ranked connections returned per call.
    pub top_k: usize,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub cache_max_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_concurrency: 4,
            global_timeout: Duration::from_secs(30),
            weights: EngineWeights::default(),
            normalization: NormalizationMethod::Linear,
            combine: CombineMethod::Average,
            top_k: 20,
            cache_enabled: true,
            cache_ttl: Duration::from_secs(300),
            cache_max_size: 500,
        }
    }
}

/// One ranked connection in the aggregated output.
#[derive(Debug, Clone)]
pub struct RankedConnection {
    pub target_chunk_id: String,
    pub score: f32,
    /// Engines that contributed a signal for this target.
    pub engines: Vec<EngineType>,
    /// Engine explanations, concatenated.
    pub explanation: String,
}

#[derive(Debug, Clone)]
pub struct AggregatedResults {
    pub source_chunk_id: String,
    pub connections: Vec<RankedConnection>,
    /// Engines whose detection failed or missed the deadline, with the
    /// error text. Their contribution is simply absent from the ranking.
    pub failed_engines: Vec<(EngineType, String)>,
    /// True when the global timeout expired before every engine finished;
    /// the connections then reflect only the engines that completed.
    pub timed_out: bool,
    /// Raw per-engine results that went into aggregation.
    pub total_results: usize,
}

/// Fans a detection request out to the registered engines, isolates
/// per-engine failures, and merges the surviving signals into one ranked
/// connection list.
pub struct CollisionOrchestrator {
    engines: Vec<Arc<EngineHarness>>,
    config: OrchestratorConfig,
    cache: ResultCache<AggregatedResults>,
}

impl CollisionOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let cache = ResultCache::new(config.cache_ttl, config.cache_max_size);
        Self {
            engines: Vec::new(),
            config,
            cache,
        }
    }

    pub fn register_engines(&mut self, engines: Vec<Arc<EngineHarness>>) {
        self.engines.extend(engines);
    }

    #[instrument(skip_all, fields(source_chunk_id = %input.source.id, targets = input.targets.len(), engines = self.engines.len()))]
    pub async fn detect_collisions(&self, input: &DetectionInput) -> AggregatedResults {
        let key = self.cache_key(input);
        if self.config.cache_enabled {
            if let Some(cached) = self.cache.get(&key) {
                return cached;
            }
        }

        let deadline = Instant::now() + self.config.global_timeout;
        let (engine_results, timed_out) = if self.config.parallel {
            self.fan_out_parallel(input, deadline).await
        } else {
            self.fan_out_sequential(input, deadline).await
        };

        let mut successes = Vec::new();
        let mut failed_engines = Vec::new();
        for (engine, outcome) in engine_results {
            match outcome {
                Ok(results) => successes.push((engine, results)),
                Err(err) => {
                    warn!(engine = engine.as_str(), error = %err, "engine failed; continuing with siblings");
                    failed_engines.push((engine, err.to_string()));
                }
            }
        }

        let total_results = successes.iter().map(|(_, r)| r.len()).sum();
        let connections = self.aggregate(successes);
        debug!(
            connections = connections.len(),
            failed = failed_engines.len(),
            timed_out,
            "collision detection aggregated"
        );

        let aggregated = AggregatedResults {
            source_chunk_id: input.source.id.clone(),
            connections,
            failed_engines,
            timed_out,
            total_results,
        };
        if self.config.cache_enabled && !timed_out && aggregated.failed_engines.is_empty() {
            self.cache.put(key, aggregated.clone());
        }
        aggregated
    }

    async fn fan_out_parallel(
        &self,
        input: &DetectionInput,
        deadline: Instant,
    ) -> (Vec<EngineOutcome>, bool) {
        let mut stream = stream::iter(self.engines.iter().map(|harness| {
            let harness = Arc::clone(harness);
            async move {
                let engine = harness.engine_type();
                (engine, harness.detect(input).await)
            }
        }))
        .buffer_unordered(self.config.max_concurrency.max(1));

        let mut collected = Vec::with_capacity(self.engines.len());
        let timed_out = loop {
            match timeout_at(deadline, stream.next()).await {
                Ok(Some(outcome)) => collected.push(outcome),
                Ok(None) => break false,
                // Dropping the stream cancels the in-flight engine futures;
                // whatever completed in time stays in `collected`.
                Err(_) => break true,
            }
        };
        if timed_out {
            drop(stream);
            let completed: Vec<EngineType> = collected.iter().map(|(engine, _)| *engine).collect();
            for harness in &self.engines {
                let engine = harness.engine_type();
                if !completed.contains(&engine) {
                    collected.push((engine, Err(timeout_error())));
                }
            }
        }
        (collected, timed_out)
    }

    async fn fan_out_sequential(
        &self,
        input: &DetectionInput,
        deadline: Instant,
    ) -> (Vec<EngineOutcome>, bool) {
        let mut collected = Vec::with_capacity(self.engines.len());
        for (index, harness) in self.engines.iter().enumerate() {
            let engine = harness.engine_type();
            match timeout_at(deadline, harness.detect(input)).await {
                Ok(outcome) => collected.push((engine, outcome)),
                Err(_) => {
                    // The engine that missed the deadline and everything
                    // behind it in the queue.
                    for pending in self.engines.iter().skip(index) {
                        collected.push((pending.engine_type(), Err(timeout_error())));
                    }
                    return (collected, true);
                }
            }
        }
        (collected, false)
    }

    /// Groups per-engine results by target, normalizes each engine's scores
    /// across its candidates, applies engine weights, and combines per
    /// target. Commutative in the engine order, so the unordered parallel
    /// fan-out needs no sequencing.
    fn aggregate(
        &self,
        successes: Vec<(EngineType, Vec<CollisionResult>)>,
    ) -> Vec<RankedConnection> {
        struct Contribution {
            weighted_scores: Vec<f32>,
            engines: Vec<EngineType>,
            explanations: Vec<String>,
        }

        let mut by_target: HashMap<String, Contribution> = HashMap::new();

        for (engine, results) in successes {
            if results.is_empty() {
                continue;
            }
            let raw: Vec<f32> = results.iter().map(|r| r.score).collect();
            let normalized = normalize_scores(&raw, self.config.normalization);
            let weight = self.config.weights.weight_for(engine);

            for (result, normalized_score) in results.into_iter().zip(normalized) {
                let entry = by_target
                    .entry(result.target_chunk_id.clone())
                    .or_insert_with(|| Contribution {
                        weighted_scores: Vec::new(),
                        engines: Vec::new(),
                        explanations: Vec::new(),
                    });
                entry.weighted_scores.push(normalized_score * weight);
                if !entry.engines.contains(&engine) {
                    entry.engines.push(engine);
                }
                if let Some(explanation) = result.explanation {
                    entry.explanations.push(explanation);
                }
            }
        }

        let mut connections: Vec<RankedConnection> = by_target
            .into_iter()
            .map(|(target_chunk_id, contribution)| RankedConnection {
                target_chunk_id,
                score: combine_scores(&contribution.weighted_scores, self.config.combine),
                engines: contribution.engines,
                explanation: contribution.explanations.join("; "),
            })
            .collect();

        connections.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.target_chunk_id.cmp(&b.target_chunk_id))
        });
        connections.truncate(self.config.top_k);
        connections
    }

    fn cache_key(&self, input: &DetectionInput) -> String {
        let target_ids: Vec<&str> = input.targets.iter().map(|t| t.id.as_str()).collect();
        let mut key =
            ResultCache::<AggregatedResults>::key("orchestrator", &input.source.id, &target_ids);
        if let Some(config) = &input.config {
            key.push(':');
            key.push_str(&config.to_string());
        }
        key
    }

    pub fn performance_metrics(&self) -> Vec<(EngineType, EngineMetrics)> {
        self.engines
            .iter()
            .map(|harness| (harness.engine_type(), harness.metrics()))
            .collect()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn engine_cache_stats(&self) -> Vec<(EngineType, CacheStats)> {
        self.engines
            .iter()
            .map(|harness| (harness.engine_type(), harness.cache_stats()))
            .collect()
    }

    pub fn cleanup(&self) {
        self.cache.clear();
        for harness in &self.engines {
            harness.cleanup();
        }
    }
}

fn timeout_error() -> AppError {
    AppError::Timeout("global detection deadline expired before the engine finished".into())
}

type EngineOutcome = (EngineType, Result<Vec<CollisionResult>, AppError>);
