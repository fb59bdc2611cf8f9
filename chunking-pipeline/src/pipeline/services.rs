use std::sync::Arc;

use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use common::{
    error::AppError, storage::ChunkStore, types::FinalChunk, utils::config::AppConfig,
};

use crate::extraction::{BoundaryModel, OpenAiBoundaryModel};

/// External dependencies of a chunking run, grouped behind one trait so
/// tests can swap in deterministic implementations.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    fn boundary_model(&self) -> &dyn BoundaryModel;

    /// Replaces the stored chunks for a document. Must be idempotent so a
    /// re-run never leaves stale chunks behind.
    async fn persist_chunks(
        &self,
        document_id: &str,
        chunks: Vec<FinalChunk>,
    ) -> Result<(), AppError>;
}

/// Production wiring: an OpenAI-compatible endpoint plus a chunk store.
pub struct DefaultPipelineServices {
    model: OpenAiBoundaryModel,
    store: Arc<dyn ChunkStore>,
}

impl DefaultPipelineServices {
    pub fn from_config(config: &AppConfig, store: Arc<dyn ChunkStore>) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.openai_api_key.clone())
            .with_api_base(config.openai_base_url.clone());
        let client = Arc::new(Client::with_config(openai_config));

        Self {
            model: OpenAiBoundaryModel::new(client, config.chunking_model.clone()),
            store,
        }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    fn boundary_model(&self) -> &dyn BoundaryModel {
        &self.model
    }

    async fn persist_chunks(
        &self,
        document_id: &str,
        chunks: Vec<FinalChunk>,
    ) -> Result<(), AppError> {
        self.store.delete_by_document(document_id).await?;
        self.store.store_chunks(document_id, chunks).await
    }
}
