/// Document text past a reader's offset.
///
/// Offsets count every byte ever appended, including bytes a capped buffer
/// has since dropped, so a reader that remembers `end` can ask for exactly
/// what it has not seen.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentSlice {
    /// Text after the requested offset
    pub text: String,

    /// Absolute offset of the end of the document
    pub end: usize,
}

impl ContentSlice {
    /// Slice of a document that only grows, held in full
    pub fn tail_of(mut content: String, offset: usize) -> Self {
        let end = content.len();
        let text = if content.is_char_boundary(offset) {
            content.split_off(offset)
        } else {
            // Not a document the reader has seen before
            content
        };
        Self { text, end }
    }
}

/// Append-only text accumulated for one live document
#[derive(Clone, Debug, Default)]
pub struct ContentBuffer {
    /// Accumulated text
    text: String,

    /// Optional size cap in bytes
    max_bytes: Option<usize>,

    /// Messages appended over the buffer's lifetime
    appended: u64,

    /// Bytes dropped from the front to honor the cap
    dropped: usize,
}

impl ContentBuffer {
    /// Create an empty buffer, capped at `max_bytes` if given
    pub fn new(max_bytes: Option<usize>) -> Self {
        Self {
            max_bytes,
            ..Self::default()
        }
    }

    /// Append a message verbatim.
    ///
    /// With a cap set, whole leading lines are dropped until the text fits.
    pub fn push(&mut self, message: &str) {
        self.text.push_str(message);
        self.appended += 1;

        if let Some(max) = self.max_bytes {
            if self.text.len() > max {
                self.trim_to(max);
            }
        }
    }

    fn trim_to(&mut self, max: usize) {
        let excess = self.text.len() - max;
        // Smallest line start at or past `excess`
        let search_from = excess.saturating_sub(1);
        let cut = self.text.as_bytes()[search_from..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|idx| search_from + idx + 1)
            .unwrap_or(self.text.len());

        self.text.drain(..cut);
        self.dropped += cut;
    }

    /// Absolute offset of the end of the text
    pub fn end(&self) -> usize {
        self.dropped + self.text.len()
    }

    /// Text after absolute byte `offset`.
    ///
    /// Bytes the cap dropped before the reader saw them are skipped. An
    /// offset past the end belongs to another document and yields all text.
    pub fn slice_since(&self, offset: usize) -> ContentSlice {
        let text = if offset > self.end() {
            &self.text
        } else {
            let start = offset.saturating_sub(self.dropped);
            self.text.get(start..).unwrap_or(&self.text)
        };
        ContentSlice {
            text: text.to_string(),
            end: self.end(),
        }
    }

    /// Current text
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Number of messages appended so far
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Bytes evicted by the cap
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_appends_verbatim() {
        let mut buffer = ContentBuffer::new(None);
        buffer.push("booting\n");
        buffer.push("ready");
        buffer.push(" and waiting\n");
        assert_eq!(buffer.as_str(), "booting\nready and waiting\n");
        assert_eq!(buffer.appended(), 3);
        assert_eq!(buffer.dropped(), 0);
    }

    #[test]
    fn test_uncapped_reads_are_prefix_extensions() {
        let mut buffer = ContentBuffer::new(None);
        let mut previous = String::new();
        for i in 0..50 {
            buffer.push(&format!("line {}\n", i));
            assert!(buffer.as_str().starts_with(&previous));
            previous = buffer.as_str().to_string();
        }
        assert_eq!(buffer.len(), previous.len());
    }

    #[test]
    fn test_cap_drops_whole_leading_lines() {
        let mut buffer = ContentBuffer::new(Some(12));
        buffer.push("aaaa\n");
        buffer.push("bbbb\n");
        assert_eq!(buffer.as_str(), "aaaa\nbbbb\n");

        buffer.push("cccc\n");
        assert_eq!(buffer.as_str(), "bbbb\ncccc\n");
        assert_eq!(buffer.dropped(), 5);
        assert!(buffer.len() <= 12);
    }

    #[test]
    fn test_cap_with_oversized_line_empties_buffer() {
        let mut buffer = ContentBuffer::new(Some(4));
        buffer.push("0123456789");
        assert!(buffer.is_empty());
        assert_eq!(buffer.dropped(), 10);
    }

    #[test]
    fn test_cap_keeps_char_boundaries() {
        let mut buffer = ContentBuffer::new(Some(8));
        buffer.push("héllo\n");
        buffer.push("wörld\n");
        assert_eq!(buffer.as_str(), "wörld\n");
    }

    #[test]
    fn test_slice_since_follows_growth() {
        let mut buffer = ContentBuffer::new(None);
        buffer.push("booting\n");
        let first = buffer.slice_since(0);
        assert_eq!(first.text, "booting\n");
        assert_eq!(first.end, 8);

        buffer.push("ready\n");
        let second = buffer.slice_since(first.end);
        assert_eq!(second.text, "ready\n");
        assert_eq!(second.end, 14);
        assert_eq!(buffer.slice_since(second.end).text, "");
    }

    #[test]
    fn test_slice_since_counts_dropped_bytes() {
        let mut buffer = ContentBuffer::new(Some(4));
        let mut seen = 0;
        let mut shown = String::new();
        for _ in 0..3 {
            buffer.push("x\n");
            let slice = buffer.slice_since(seen);
            shown.push_str(&slice.text);
            seen = slice.end;
        }
        assert_eq!(buffer.as_str(), "x\nx\n");
        assert_eq!(buffer.dropped(), 2);
        assert_eq!(shown, "x\nx\nx\n");
    }

    #[test]
    fn test_slice_since_skips_text_dropped_before_it_was_read() {
        let mut buffer = ContentBuffer::new(Some(10));
        for line in ["aaaa\n", "bbbb\n", "cccc\n"] {
            buffer.push(line);
        }
        let slice = buffer.slice_since(0);
        assert_eq!(slice.text, "bbbb\ncccc\n");
        assert_eq!(slice.end, 15);
    }

    #[test]
    fn test_slice_since_offset_past_end_yields_everything() {
        let mut buffer = ContentBuffer::new(None);
        buffer.push("new\n");
        assert_eq!(buffer.slice_since(100).text, "new\n");
        assert_eq!(buffer.slice_since(100).end, 4);
    }

    #[test]
    fn test_tail_of_full_content() {
        let slice = ContentSlice::tail_of("Hello World".to_string(), 6);
        assert_eq!(slice.text, "World");
        assert_eq!(slice.end, 11);
        assert_eq!(ContentSlice::tail_of("abc".to_string(), 9).text, "abc");
    }
}
