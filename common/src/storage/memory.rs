use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{error::AppError, types::FinalChunk};

use super::store::{ChunkStore, ConnectionStore, StoredConnection};

/// In-memory store used by tests and evaluations.
#[derive(Default)]
pub struct MemoryStore {
    chunks: Mutex<HashMap<String, Vec<FinalChunk>>>,
    connections: Mutex<HashMap<(String, String, String), StoredConnection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn chunks_for(&self, document_id: &str) -> Vec<FinalChunk> {
        self.chunks
            .lock()
            .await
            .get(document_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn store_chunks(
        &self,
        document_id: &str,
        chunks: Vec<FinalChunk>,
    ) -> Result<(), AppError> {
        self.chunks
            .lock()
            .await
            .insert(document_id.to_string(), chunks);
        Ok(())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<(), AppError> {
        self.chunks.lock().await.remove(document_id);
        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn upsert_connections(
        &self,
        connections: Vec<StoredConnection>,
    ) -> Result<(), AppError> {
        let mut guard = self.connections.lock().await;
        for connection in connections {
            let key = (
                connection.source_chunk_id.clone(),
                connection.target_chunk_id.clone(),
                connection.engine.clone(),
            );
            guard.insert(key, connection);
        }
        Ok(())
    }
}
