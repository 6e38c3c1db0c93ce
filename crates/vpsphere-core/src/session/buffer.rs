//! Accumulator for decoded output between flushes.

/// Ordered text fragments plus their combined length in characters.
///
/// Lengths are counted in Unicode scalar values, which is what the chat
/// message limit is expressed in.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    fragments: Vec<String>,
    total_len: usize,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment.
    pub fn push(&mut self, fragment: String) {
        self.total_len += fragment.chars().count();
        self.fragments.push(fragment);
    }

    /// Combined length of all fragments in characters.
    pub fn len(&self) -> usize {
        self.total_len
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Whether the buffer has grown past `threshold`.
    pub fn exceeds(&self, threshold: usize) -> bool {
        self.total_len > threshold
    }

    /// Concatenate and clear the buffer.
    pub fn take(&mut self) -> String {
        let joined = self.fragments.concat();
        self.clear();
        joined
    }

    pub fn clear(&mut self) {
        self.fragments.clear();
        self.total_len = 0;
    }
}
