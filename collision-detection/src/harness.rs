use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::error::AppError;
use tracing::{debug, instrument};

use crate::{
    cache::{CacheStats, ResultCache},
    engine::CollisionEngine,
    scoring::clamp_unit,
    types::{CollisionResult, DetectionInput, EngineType},
};

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub min_score: f32,
    pub max_results: usize,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub cache_max_size: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            min_score: 0.3,
            max_results: 50,
            cache_enabled: true,
            cache_ttl: Duration::from_secs(300),
            cache_max_size: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineMetrics {
    pub detections: u64,
    pub cache_hits: u64,
    pub total_detection_time: Duration,
}

impl EngineMetrics {
    pub fn average_detection_time(&self) -> Duration {
        if self.detections == 0 {
            return Duration::ZERO;
        }
        self.total_detection_time / u32::try_from(self.detections).unwrap_or(u32::MAX)
    }
}

/// Wraps a bare engine with the shared cross-cutting behavior: empty-input
/// short-circuit, config validation, result cache, post-processing and
/// metrics. Engines stay algorithm-only; the orchestrator talks to
/// harnesses exclusively.
pub struct EngineHarness {
    engine: Arc<dyn CollisionEngine>,
    config: HarnessConfig,
    cache: ResultCache<Vec<CollisionResult>>,
    detections: AtomicU64,
    total_detection_ms: AtomicU64,
}

impl EngineHarness {
    pub fn new(engine: Arc<dyn CollisionEngine>, config: HarnessConfig) -> Self {
        let cache = ResultCache::new(config.cache_ttl, config.cache_max_size);
        Self {
            engine,
            config,
            cache,
            detections: AtomicU64::new(0),
            total_detection_ms: AtomicU64::new(0),
        }
    }

    pub fn engine_type(&self) -> EngineType {
        self.engine.engine_type()
    }

    #[instrument(skip_all, fields(engine = self.engine.engine_type().as_str(), targets = input.targets.len()))]
    pub async fn detect(&self, input: &DetectionInput) -> Result<Vec<CollisionResult>, AppError> {
        if input.targets.is_empty() {
            return Ok(Vec::new());
        }
        if !self.engine.can_process(input) {
            debug!("engine cannot process input; skipping");
            return Ok(Vec::new());
        }
        self.validate_config(input)?;

        let key = self.cache_key(input);
        if self.config.cache_enabled {
            if let Some(cached) = self.cache.get(&key) {
                return Ok(cached);
            }
        }

        let started = Instant::now();
        let raw = self.engine.detect(input).await?;
        let elapsed = started.elapsed();

        self.detections.fetch_add(1, AtomicOrdering::Relaxed);
        self.total_detection_ms.fetch_add(
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            AtomicOrdering::Relaxed,
        );

        let results = self.post_process(raw);
        if self.config.cache_enabled {
            self.cache.put(key, results.clone());
        }
        Ok(results)
    }

    fn validate_config(&self, input: &DetectionInput) -> Result<(), AppError> {
        let Some(config) = &input.config else {
            return Ok(());
        };
        let Some(overrides) = config.as_object() else {
            return Err(AppError::Validation(format!(
                "{} config overrides must be a JSON object",
                self.engine.engine_type().as_str()
            )));
        };

        let schema = self.engine.config_schema();
        let known = schema.get("properties").and_then(|p| p.as_object());
        for key in overrides.keys() {
            let recognized = known.is_some_and(|properties| properties.contains_key(key));
            if !recognized {
                return Err(AppError::Validation(format!(
                    "unknown config key `{key}` for engine {}",
                    self.engine.engine_type().as_str()
                )));
            }
        }
        Ok(())
    }

    fn cache_key(&self, input: &DetectionInput) -> String {
        let target_ids: Vec<&str> = input.targets.iter().map(|t| t.id.as_str()).collect();
        let mut key = ResultCache::<Vec<CollisionResult>>::key(
            self.engine.engine_type().as_str(),
            &input.source.id,
            &target_ids,
        );
        if let Some(config) = &input.config {
            key.push(':');
            key.push_str(&config.to_string());
        }
        key
    }

    fn post_process(&self, raw: Vec<CollisionResult>) -> Vec<CollisionResult> {
        let mut results: Vec<CollisionResult> = raw
            .into_iter()
            .map(|mut result| {
                result.score = clamp_unit(result.score);
                result
            })
            .filter(|result| result.score >= self.config.min_score)
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.target_chunk_id.cmp(&b.target_chunk_id))
        });
        results.truncate(self.config.max_results);
        results
    }

    pub fn metrics(&self) -> EngineMetrics {
        EngineMetrics {
            detections: self.detections.load(AtomicOrdering::Relaxed),
            cache_hits: self.cache.stats().hits,
            total_detection_time: Duration::from_millis(
                self.total_detection_ms.load(AtomicOrdering::Relaxed),
            ),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cleanup(&self) {
        self.cache.clear();
        self.engine.cleanup();
    }
}
