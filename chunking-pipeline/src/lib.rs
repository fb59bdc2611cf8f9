pub mod batching;
pub mod correction;
pub mod dedupe;
pub mod extraction;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod retry;
pub mod splitting;
pub mod validation;

pub use batching::{create_batches, split_batch, DocumentBatch};
pub use correction::{CorrectionStats, OffsetCorrector};
pub use extraction::{BoundaryModel, ExtractionOutcome, OpenAiBoundaryModel};
pub use pipeline::{
    ChunkingConfig, ChunkingPipeline, ChunkingReport, ChunkingTuning, DefaultPipelineServices,
    PipelineServices,
};
pub use progress::{ProgressPhase, ProgressReporter, ProgressUpdate};
pub use retry::RetryPolicy;
