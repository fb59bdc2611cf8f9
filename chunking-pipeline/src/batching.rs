use common::types::Document;
use tracing::debug;

/// A contiguous slice of the source document sent to the boundary model in
/// one call. Offsets are absolute byte offsets into the document.
#[derive(Debug, Clone)]
pub struct DocumentBatch {
    pub batch_id: usize,
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl DocumentBatch {
    pub fn len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset)
    }

    pub fn is_empty(&self) -> bool {
        self.start_offset >= self.end_offset
    }
}

/// Slides a window of `max_batch_size` bytes across the document. When a
/// window does not reach the end, the next window starts `overlap` bytes
/// before the previous end so no semantic unit is cut without a second full
/// view in the neighboring batch. Window edges are snapped back to char
/// boundaries.
pub fn create_batches(document: &Document, max_batch_size: usize, overlap: usize) -> Vec<DocumentBatch> {
    let len = document.len();
    if len == 0 || max_batch_size == 0 {
        return Vec::new();
    }

    if len <= max_batch_size {
        return vec![DocumentBatch {
            batch_id: 0,
            content: document.text.clone(),
            start_offset: 0,
            end_offset: len,
        }];
    }

    let mut batches = Vec::new();
    let mut start = 0usize;
    let mut batch_id = 0usize;

    loop {
        let raw_end = start.saturating_add(max_batch_size).min(len);
        let end = if raw_end == len {
            len
        } else {
            document.floor_char_boundary(raw_end)
        };

        if let Some(content) = document.slice(start, end) {
            batches.push(DocumentBatch {
                batch_id,
                content: content.to_string(),
                start_offset: start,
                end_offset: end,
            });
        }

        if end >= len {
            break;
        }

        let mut next = document.floor_char_boundary(end.saturating_sub(overlap));
        if next <= start {
            // Degenerate overlap configuration; move forward without overlap
            // rather than looping forever.
            next = end;
        }
        start = next;
        batch_id = batch_id.saturating_add(1);
    }

    debug!(
        document_id = %document.id,
        batch_count = batches.len(),
        max_batch_size,
        overlap,
        "document sliced into batches"
    );

    batches
}

/// Splits a batch near its midpoint at the most natural boundary available,
/// in priority order: paragraph break, line break, sentence break, period,
/// hard half. Used when the model repeatedly violates size constraints on a
/// batch; the halves stay semantically coherent where possible.
pub fn split_batch(batch: &DocumentBatch) -> (DocumentBatch, DocumentBatch) {
    let content = batch.content.as_str();
    let split_at = natural_midpoint(content);

    let (left, right) = content.split_at(split_at);
    let midpoint = batch.start_offset.saturating_add(split_at);

    (
        DocumentBatch {
            batch_id: batch.batch_id,
            content: left.to_string(),
            start_offset: batch.start_offset,
            end_offset: midpoint,
        },
        DocumentBatch {
            batch_id: batch.batch_id,
            content: right.to_string(),
            start_offset: midpoint,
            end_offset: batch.end_offset,
        },
    )
}

/// Byte position closest to the midpoint that sits just after a natural
/// boundary. Falls back to the hard half, snapped to a char boundary.
fn natural_midpoint(content: &str) -> usize {
    let mid = content.len() / 2;
    let lower = content.len() / 4;
    let upper = content.len().saturating_sub(lower);

    for pattern in ["\n\n", "\n", ". ", "."] {
        if let Some(pos) = closest_boundary(content, pattern, mid, lower, upper) {
            return pos;
        }
    }

    let mut at = mid;
    while at > 0 && !content.is_char_boundary(at) {
        at = at.saturating_sub(1);
    }
    at
}

fn closest_boundary(
    content: &str,
    pattern: &str,
    mid: usize,
    lower: usize,
    upper: usize,
) -> Option<usize> {
    content
        .match_indices(pattern)
        .map(|(pos, matched)| pos.saturating_add(matched.len()))
        .filter(|end| *end >= lower && *end <= upper)
        .min_by_key(|end| end.abs_diff(mid))
}
