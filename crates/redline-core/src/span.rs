//! Text spans for gate evidence and sanitization audit records.
//!
//! A span points at a byte range of the document as it was when the span
//! was recorded, using the pointer format `text[start:end]`.

use serde::{Deserialize, Serialize};

/// A byte range within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

impl TextSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Span of a regex match.
    pub fn of(m: &regex::Match<'_>) -> Self {
        Self::new(m.start(), m.end())
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pointer string, e.g. `text[42:68]`.
    pub fn pointer(&self) -> String {
        format!("text[{}:{}]", self.start, self.end)
    }

    /// Slice `text` by this span, if it lies on char boundaries.
    pub fn slice<'a>(&self, text: &'a str) -> Option<&'a str> {
        text.get(self.start..self.end)
    }
}

/// Clamp `index` down to the nearest char boundary of `text`.
pub fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_format() {
        let span = TextSpan::new(42, 68);
        assert_eq!(span.pointer(), "text[42:68]");
        assert_eq!(span.len(), 26);
    }

    #[test]
    fn test_slice() {
        let span = TextSpan::new(6, 11);
        assert_eq!(span.slice("Hello world"), Some("world"));
        assert_eq!(TextSpan::new(6, 40).slice("Hello world"), None);
    }

    #[test]
    fn test_floor_char_boundary() {
        let text = "caf\u{e9} ok";
        // 'é' occupies bytes 3..5
        assert_eq!(floor_char_boundary(text, 4), 3);
        assert_eq!(floor_char_boundary(text, 100), text.len());
    }
}
