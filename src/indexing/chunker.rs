//! Sliding-window text chunking.
//!
//! Chunks are measured in characters (Unicode scalar values), never bytes, so a
//! window boundary can not split a multi-byte character. The output depends on
//! nothing but the text and the two window parameters.

/// A contiguous span of a file's text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the chunk within its file, starting at 0
    pub index: usize,
    /// Character offset of the first character (inclusive)
    pub start: usize,
    /// Character offset one past the last character (exclusive)
    pub end: usize,
    /// 1-based line of the first character
    pub start_line: usize,
    /// 1-based line of the last character
    pub end_line: usize,
    pub text: String,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// Split `text` into windows of `chunk_size` characters advancing by
/// `chunk_size - chunk_overlap`.
///
/// Windows start at offset 0 and keep coming until the window start reaches the
/// end of the text; the last window may be shorter than `chunk_size`. Empty text
/// gives no chunks. Callers validate `chunk_overlap < chunk_size` through
/// [`Config::validate`](crate::core::config::Config::validate); an invalid pair
/// is clamped to a step of one character instead of looping forever.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    // Byte offset of every char boundary, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = boundaries.len() - 1;
    let step = chunk_size.saturating_sub(chunk_overlap).max(1);

    let mut chunks = Vec::with_capacity(total_chars / step + 1);
    let mut line = 1;
    let mut line_counted_to = 0;

    let mut start = 0;
    while start < total_chars {
        let end = (start + chunk_size).min(total_chars);
        let byte_start = boundaries[start];
        let byte_end = boundaries[end];

        line += count_newlines(&text[line_counted_to..byte_start]);
        line_counted_to = byte_start;

        let chunk_text = &text[byte_start..byte_end];
        let end_line = line + count_newlines(chunk_text.strip_suffix('\n').unwrap_or(chunk_text));

        chunks.push(Chunk {
            index: chunks.len(),
            start,
            end,
            start_line: line,
            end_line,
            text: chunk_text.to_string(),
        });

        start += step;
    }

    chunks
}

fn count_newlines(s: &str) -> usize {
    s.bytes().filter(|b| *b == b'\n').count()
}
