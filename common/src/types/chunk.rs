use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single concept the model attributed to a chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConceptRef {
    pub text: String,
    #[serde(default = "default_importance")]
    pub importance: f32,
}

fn default_importance() -> f32 {
    0.5
}

/// Emotional signal attached to a chunk. Polarity runs -1..1, intensity 0..1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmotionalTone {
    pub polarity: f32,
    pub primary_emotion: String,
    pub intensity: f32,
}

impl Default for EmotionalTone {
    fn default() -> Self {
        Self {
            polarity: 0.0,
            primary_emotion: "neutral".to_string(),
            intensity: 0.0,
        }
    }
}

impl EmotionalTone {
    pub fn is_valid(&self) -> bool {
        (-1.0..=1.0).contains(&self.polarity)
            && (0.0..=1.0).contains(&self.intensity)
            && !self.primary_emotion.is_empty()
    }
}

/// Normalized chunk metadata. Validated once at the ingestion boundary;
/// downstream stages can rely on every field being in range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChunkMetadata {
    pub themes: Vec<String>,
    pub concepts: Vec<ConceptRef>,
    pub importance: f32,
    pub summary: Option<String>,
    pub domain: Option<String>,
    pub emotional: EmotionalTone,
}

/// Raw model output for one chunk, prior to validation. Offsets are
/// batch-relative and only approximately correct; the model frequently
/// renormalizes whitespace, so `content` may not match the source bytes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawChunkCandidate {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub start_offset: Option<i64>,
    #[serde(default)]
    pub end_offset: Option<i64>,
    #[serde(default)]
    pub themes: Option<Vec<String>>,
    #[serde(default)]
    pub concepts: Option<Vec<ConceptRef>>,
    #[serde(default)]
    pub importance: Option<f32>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub emotional: Option<EmotionalTone>,
}

/// A chunk whose offsets have been converted to absolute document
/// coordinates and whose metadata has been normalized.
/// Invariant: `start_offset < end_offset <= document.len()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedChunk {
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub metadata: ChunkMetadata,
}

/// How an offset correction was established.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    /// Content found verbatim in the document.
    Exact,
    /// Content located after whitespace/heading normalization; offsets are
    /// still byte-exact against the source.
    Fuzzy,
    /// Best-effort match (anchors or similarity window); offsets may not
    /// reproduce the content verbatim.
    Approximate,
}

/// A validated chunk whose content has been reconciled against the source
/// document. For `Exact` and `Fuzzy` confidence,
/// `document.slice(start_offset, end_offset) == content` holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectedChunk {
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub metadata: ChunkMetadata,
    pub confidence: MatchConfidence,
    /// Similarity of the accepted match, in percent.
    pub similarity: f32,
}

impl CorrectedChunk {
    pub fn from_validated(chunk: ValidatedChunk, confidence: MatchConfidence, similarity: f32) -> Self {
        Self {
            content: chunk.content,
            start_offset: chunk.start_offset,
            end_offset: chunk.end_offset,
            metadata: chunk.metadata,
            confidence,
            similarity,
        }
    }
}

/// The persisted unit of a finished run: deduplicated, densely indexed,
/// sorted by `start_offset`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub metadata: ChunkMetadata,
    pub confidence: MatchConfidence,
    pub created_at: DateTime<Utc>,
}

impl FinalChunk {
    pub fn new(document_id: &str, chunk_index: usize, chunk: CorrectedChunk) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            chunk_index,
            content: chunk.content,
            start_offset: chunk.start_offset,
            end_offset: chunk.end_offset,
            metadata: chunk.metadata,
            confidence: chunk.confidence,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_candidate_tolerates_missing_fields() {
        let parsed: RawChunkCandidate =
            serde_json::from_str(r#"{"content": "hello", "start_offset": 0}"#)
                .expect("partial candidate parses");
        assert_eq!(parsed.content.as_deref(), Some("hello"));
        assert_eq!(parsed.start_offset, Some(0));
        assert!(parsed.end_offset.is_none());
        assert!(parsed.emotional.is_none());
    }

    #[test]
    fn emotional_tone_validity_bounds() {
        assert!(EmotionalTone::default().is_valid());
        let out_of_range = EmotionalTone {
            polarity: 1.5,
            primary_emotion: "joy".into(),
            intensity: 0.2,
        };
        assert!(!out_of_range.is_valid());
    }

    #[test]
    fn match_confidence_serializes_lowercase() {
        let json = serde_json::to_string(&MatchConfidence::Exact).expect("serializes");
        assert_eq!(json, "\"exact\"");
    }
}
