use common::types::DocumentType;

/// Empirically chosen knobs for one chunking run. The overlap and threshold
/// defaults mirror the production values; they are tunable, not proven
/// optimal.
#[derive(Debug, Clone)]
pub struct ChunkingTuning {
    /// Window size for one LLM call, in bytes of source text.
    pub max_batch_size: usize,
    /// Overlap between adjacent windows.
    pub overlap_size: usize,
    /// Hard cap on chunk content, in characters (embedding limit).
    pub max_chunk_size: usize,
    /// Soft floor the prompt asks the model to respect.
    pub min_chunk_size: usize,
    /// LLM attempts per batch before degrading.
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    /// Fraction of chunks allowed to fail offset correction before the run
    /// is considered corrupted.
    pub correction_failure_threshold: f32,
    /// A chunk overlapping its predecessor by more than this fraction of
    /// its own length is a duplicate candidate.
    pub dedupe_overlap_ratio: f32,
    /// Forward search window for anchor/similarity matching, in bytes.
    pub correction_window: usize,
    /// Sliding-window similarity acceptance floor, percent.
    pub similarity_accept_pct: f32,
    /// Early-exit similarity for the sliding window search, percent.
    pub similarity_early_exit_pct: f32,
}

impl Default for ChunkingTuning {
    fn default() -> Self {
        Self {
            max_batch_size: 100_000,
            overlap_size: 1_000,
            max_chunk_size: 10_000,
            min_chunk_size: 200,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            correction_failure_threshold: 0.2,
            dedupe_overlap_ratio: 0.5,
            correction_window: 20_000,
            similarity_accept_pct: 70.0,
            similarity_early_exit_pct: 85.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChunkingConfig {
    pub tuning: ChunkingTuning,
    /// In strict mode missing metadata is a validation error instead of a
    /// defaulted warning. Used by tests/CI that want zero silent defaulting.
    pub strict: bool,
    pub document_type: Option<DocumentType>,
}
