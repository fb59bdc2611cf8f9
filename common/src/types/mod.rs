pub mod chunk;
pub mod document;
pub mod document_type;

pub use chunk::{
    ChunkMetadata, ConceptRef, CorrectedChunk, EmotionalTone, FinalChunk, MatchConfidence,
    RawChunkCandidate, ValidatedChunk,
};
pub use document::Document;
pub use document_type::DocumentType;
