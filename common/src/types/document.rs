use serde::{Deserialize, Serialize};

/// Immutable source text for one chunking run. The document is the single
/// source of truth for all offset math: every chunk offset in the pipeline
/// is a byte offset into `text`, always landing on a char boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Exact substring at `[start, end)`, or `None` when the range is out of
    /// bounds or cuts a char boundary.
    pub fn slice(&self, start: usize, end: usize) -> Option<&str> {
        if start >= end || end > self.text.len() {
            return None;
        }
        self.text.get(start..end)
    }

    /// Largest char boundary at or below `offset`.
    pub fn floor_char_boundary(&self, offset: usize) -> usize {
        let mut at = offset.min(self.text.len());
        while at > 0 && !self.text.is_char_boundary(at) {
            at = at.saturating_sub(1);
        }
        at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_returns_exact_substring() {
        let doc = Document::new("doc-1", "hello world");
        assert_eq!(doc.slice(0, 5), Some("hello"));
        assert_eq!(doc.slice(6, 11), Some("world"));
    }

    #[test]
    fn slice_rejects_out_of_bounds_and_inverted_ranges() {
        let doc = Document::new("doc-1", "short");
        assert_eq!(doc.slice(0, 99), None);
        assert_eq!(doc.slice(3, 3), None);
        assert_eq!(doc.slice(4, 2), None);
    }

    #[test]
    fn floor_char_boundary_respects_multibyte_chars() {
        let doc = Document::new("doc-1", "aé b");
        // 'é' occupies bytes 1..3; offset 2 lands inside it.
        assert_eq!(doc.floor_char_boundary(2), 1);
        assert_eq!(doc.floor_char_boundary(3), 3);
    }
}
