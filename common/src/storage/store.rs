use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, types::FinalChunk};

/// Persistence shape for a detected connection between two chunks.
/// `(source_chunk_id, target_chunk_id, engine)` is the upsert key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConnection {
    pub source_chunk_id: String,
    pub target_chunk_id: String,
    pub engine: String,
    pub score: f32,
    pub explanation: Option<String>,
    pub detected_at: DateTime<Utc>,
}

/// Narrow persistence seam for finished chunks. The real application backs
/// this with Postgres/pgvector; the pipeline only needs these two calls.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn store_chunks(&self, document_id: &str, chunks: Vec<FinalChunk>)
        -> Result<(), AppError>;

    async fn delete_by_document(&self, document_id: &str) -> Result<(), AppError>;
}

/// Persistence seam for aggregated collision results. Upserts must be
/// idempotent on the composite key.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn upsert_connections(&self, connections: Vec<StoredConnection>)
        -> Result<(), AppError>;
}
