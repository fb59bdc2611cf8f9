use common::types::DocumentType;
use serde_json::json;

use crate::batching::DocumentBatch;

pub static BOUNDARY_SYSTEM_MESSAGE: &str = "You are a document segmentation engine. You split \
markdown documents into semantically coherent chunks and report, for each chunk, its exact \
character offsets within the supplied text plus thematic metadata. You respond with JSON only, \
matching the provided schema exactly. You never reword, summarize, or normalize the source \
text inside `content`: it must be copied verbatim.";

/// Builds the deterministic instruction block for one batch. The batch's
/// absolute start offset is embedded so the model can report consistent
/// positions across batches; offsets in the response stay batch-relative.
pub fn build_boundary_prompt(
    batch: &DocumentBatch,
    min_chunk_size: usize,
    max_chunk_size: usize,
    document_type: Option<DocumentType>,
) -> String {
    let guidance = document_type.map_or_else(
        || generic_guidance().to_string(),
        |doc_type| format!("{}\n{}", generic_guidance(), type_guidance(doc_type)),
    );

    format!(
        "Segment the following document excerpt into semantic chunks.\n\
         \n\
         Excerpt position: this text begins at absolute character offset {start} of the full \
         document and is {len} characters long. Report start_offset and end_offset relative to \
         the START OF THIS EXCERPT (0-based, end exclusive).\n\
         \n\
         Hard constraints:\n\
         - Every chunk MUST be between {min} and {max} characters. Never exceed {max}.\n\
         - `content` MUST be the verbatim excerpt text for the reported offset range.\n\
         - Chunks must appear in document order and must not overlap.\n\
         - Cover the excerpt as completely as possible; do not silently drop text.\n\
         \n\
         Markdown handling:\n\
         - Never split a fenced code block across chunks.\n\
         - Keep a list item with its list; keep a table with its header row.\n\
         - A heading belongs with the content it introduces.\n\
         \n\
         {guidance}\n\
         \n\
         For each chunk also report: themes (1-3 short phrases), concepts (each with an \
         importance in [0,1]), an overall importance in [0,1], a one-sentence summary, a domain \
         label, and an emotional reading (polarity in [-1,1], primary_emotion, intensity in \
         [0,1]).\n\
         \n\
         Text to segment:\n\
         ---\n\
         {content}\n\
         ---",
        start = batch.start_offset,
        len = batch.content.chars().count(),
        min = min_chunk_size,
        max = max_chunk_size,
        guidance = guidance,
        content = batch.content,
    )
}

fn generic_guidance() -> &'static str {
    "Semantic unit guidance:\n\
     - A chunk is one complete idea: a claim with its support, a step with its rationale, a \
     scene beat, or a definition with its elaboration."
}

fn type_guidance(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::Fiction => {
            "- Fiction: keep a dialogue exchange intact; keep a scene's action and its \
             immediate consequence together; split on scene or viewpoint shifts."
        }
        DocumentType::AcademicPaper => {
            "- Academic paper: keep a claim with its evidence and citation; keep a method step \
             with its justification; figures/tables stay with their discussion."
        }
        DocumentType::TechnicalManual => {
            "- Technical manual: keep a procedure's steps together up to the size cap; keep \
             warnings with the step they qualify; keep a configuration block with its \
             explanation."
        }
        DocumentType::Article => {
            "- Article: keep a reported fact with its attribution; keep a quote with its \
             framing sentences."
        }
        DocumentType::Essay => {
            "- Essay: keep an argumentative move intact: assertion, development, and the \
             transition that lands it."
        }
        DocumentType::NonfictionBook => {
            "- Nonfiction book: keep claim, evidence, and conclusion together; keep an anecdote \
             with the point it illustrates."
        }
    }
}

/// Strict response schema for the boundary extraction call. Mirrors the
/// `RawChunkCandidate` shape; all fields are required with nullable types so
/// the model can omit metadata without breaking strict mode.
pub fn boundary_response_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "chunks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "content": { "type": "string" },
                        "start_offset": { "type": "integer" },
                        "end_offset": { "type": "integer" },
                        "themes": {
                            "type": ["array", "null"],
                            "items": { "type": "string" }
                        },
                        "concepts": {
                            "type": ["array", "null"],
                            "items": {
                                "type": "object",
                                "properties": {
                                    "text": { "type": "string" },
                                    "importance": { "type": "number" }
                                },
                                "required": ["text", "importance"],
                                "additionalProperties": false
                            }
                        },
                        "importance": { "type": ["number", "null"] },
                        "summary": { "type": ["string", "null"] },
                        "domain": { "type": ["string", "null"] },
                        "emotional": {
                            "type": ["object", "null"],
                            "properties": {
                                "polarity": { "type": "number" },
                                "primary_emotion": { "type": "string" },
                                "intensity": { "type": "number" }
                            },
                            "required": ["polarity", "primary_emotion", "intensity"],
                            "additionalProperties": false
                        }
                    },
                    "required": [
                        "content", "start_offset", "end_offset", "themes", "concepts",
                        "importance", "summary", "domain", "emotional"
                    ],
                    "additionalProperties": false
                }
            }
        },
        "required": ["chunks"],
        "additionalProperties": false
    })
}
