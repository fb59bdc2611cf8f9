use async_trait::async_trait;
use common::error::AppError;

use crate::types::{CollisionResult, DetectionInput, EngineType};

/// Contract every detection engine implements. Engines hold only their
/// algorithm and collaborators; caching, config validation, filtering and
/// metrics live in the harness wrapper.
#[async_trait]
pub trait CollisionEngine: Send + Sync {
    fn engine_type(&self) -> EngineType;

    /// Metadata-sufficiency check. Returning false is not an error: the
    /// harness silently yields zero results for inputs the engine cannot
    /// judge.
    fn can_process(&self, input: &DetectionInput) -> bool;

    /// Runs the detection algorithm. Scores must land in [0, 1]; the
    /// harness clamps as a backstop.
    async fn detect(&self, input: &DetectionInput) -> Result<Vec<CollisionResult>, AppError>;

    /// JSON schema describing the per-call config overrides the engine
    /// accepts. Used by the harness to reject unknown keys early.
    fn config_schema(&self) -> serde_json::Value;

    /// Releases engine-held resources. Default is a no-op.
    fn cleanup(&self) {}
}
