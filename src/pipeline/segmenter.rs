//! Incremental splitting of generated text at the pause delimiter.

use super::types::SpeechSegment;

/// Splits a stream of text deltas into speakable segments.
///
/// Text is buffered rather than scanned per delta, so a delimiter split
/// across two deltas is still found. Segments that are empty after trimming
/// are dropped without consuming an index.
#[derive(Debug, Clone)]
pub struct StreamSegmenter {
    delimiter: String,
    full_text: String,
    pending: String,
    next_index: usize,
}

impl StreamSegmenter {
    pub fn new(delimiter: &str) -> Self {
        Self {
            delimiter: delimiter.to_string(),
            full_text: String::new(),
            pending: String::new(),
            next_index: 0,
        }
    }

    /// Append a delta and return every segment it completes.
    pub fn feed(&mut self, delta: &str) -> Vec<SpeechSegment> {
        self.full_text.push_str(delta);
        self.pending.push_str(delta);

        let mut segments = Vec::new();
        if self.delimiter.is_empty() {
            return segments;
        }
        while let Some(at) = self.pending.find(&self.delimiter) {
            let rest = self.pending.split_off(at + self.delimiter.len());
            self.pending.truncate(at);
            let head = std::mem::replace(&mut self.pending, rest);
            if let Some(segment) = self.make_segment(&head) {
                segments.push(segment);
            }
        }
        segments
    }

    /// End of stream: emit whatever is left as the final segment.
    pub fn flush(&mut self) -> Option<SpeechSegment> {
        let tail = std::mem::take(&mut self.pending);
        self.make_segment(&tail)
    }

    /// Everything fed so far, delimiters included.
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    /// Number of segments emitted so far.
    pub fn emitted(&self) -> usize {
        self.next_index
    }

    fn make_segment(&mut self, text: &str) -> Option<SpeechSegment> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let segment = SpeechSegment::new(self.next_index, text);
        self.next_index += 1;
        Some(segment)
    }
}

/// Segment an already-complete text.
pub fn segment_text(text: &str, delimiter: &str) -> Vec<SpeechSegment> {
    let mut segmenter = StreamSegmenter::new(delimiter);
    let mut segments = segmenter.feed(text);
    segments.extend(segmenter.flush());
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(segments: &[SpeechSegment]) -> Vec<&str> {
        segments.iter().map(|s| s.text.as_str()).collect()
    }

    /// Feed `text` as deltas cut at the given byte offsets.
    fn feed_split(delimiter: &str, text: &str, cuts: &[usize]) -> (Vec<SpeechSegment>, String) {
        let mut segmenter = StreamSegmenter::new(delimiter);
        let mut segments = Vec::new();
        let mut start = 0;
        for &cut in cuts.iter().chain(std::iter::once(&text.len())) {
            segments.extend(segmenter.feed(&text[start..cut]));
            start = cut;
        }
        segments.extend(segmenter.flush());
        (segments, segmenter.full_text().to_string())
    }

    #[test]
    fn splits_at_every_boundary() {
        let text = "Hello|World|";
        for cut in 0..=text.len() {
            let (segments, full) = feed_split("|", text, &[cut]);
            assert_eq!(texts(&segments), vec!["Hello", "World"], "cut at {cut}");
            assert_eq!(full, text);
        }
    }

    #[test]
    fn splits_at_every_pair_of_boundaries() {
        let text = "Hello|World|";
        for a in 0..=text.len() {
            for b in a..=text.len() {
                let (segments, _) = feed_split("|", text, &[a, b]);
                assert_eq!(texts(&segments), vec!["Hello", "World"]);
                let indices: Vec<_> = segments.iter().map(|s| s.index).collect();
                assert_eq!(indices, vec![0, 1]);
            }
        }
    }

    #[test]
    fn multi_char_delimiter_split_across_deltas() {
        let text = "Hello<br>World<br>";
        for cut in 0..=text.len() {
            let (segments, full) = feed_split("<br>", text, &[cut]);
            assert_eq!(texts(&segments), vec!["Hello", "World"], "cut at {cut}");
            assert_eq!(full, text);
        }
    }

    #[test]
    fn multi_byte_delimiter_split_inside_character() {
        // U+FF5C FULLWIDTH VERTICAL LINE is three bytes in UTF-8.
        let delimiter = "\u{ff5c}";
        let text = format!("你好{delimiter}世界{delimiter}");
        let bytes = text.as_bytes();
        for cut in 0..=bytes.len() {
            let mut segmenter = StreamSegmenter::new(delimiter);
            let mut segments = Vec::new();
            // Deltas arrive as strings, so emulate a byte split by holding
            // back an incomplete character until the next delta.
            let (a, b) = bytes.split_at(cut);
            let boundary = (0..=a.len())
                .rev()
                .find(|&i| std::str::from_utf8(&a[..i]).is_ok())
                .unwrap();
            let first = std::str::from_utf8(&a[..boundary]).unwrap();
            let mut second = a[boundary..].to_vec();
            second.extend_from_slice(b);
            segments.extend(segmenter.feed(first));
            segments.extend(segmenter.feed(std::str::from_utf8(&second).unwrap()));
            segments.extend(segmenter.flush());
            assert_eq!(texts(&segments), vec!["你好", "世界"]);
        }
    }

    #[test]
    fn single_delta_with_many_delimiters() {
        let mut segmenter = StreamSegmenter::new("|");
        let segments = segmenter.feed("a|b|c|d");
        assert_eq!(texts(&segments), vec!["a", "b", "c"]);
        assert_eq!(segmenter.flush().unwrap().text, "d");
        assert_eq!(segmenter.emitted(), 4);
    }

    #[test]
    fn segments_are_trimmed_and_empty_ones_dropped() {
        let segments = segment_text("  one | |two||  ", "|");
        assert_eq!(texts(&segments), vec!["one", "two"]);
        assert_eq!(segments[1].index, 1);
    }

    #[test]
    fn no_delimiter_yields_single_segment_on_flush() {
        let mut segmenter = StreamSegmenter::new("|");
        assert!(segmenter.feed("just one clause").is_empty());
        let last = segmenter.flush().unwrap();
        assert_eq!(last, SpeechSegment::new(0, "just one clause"));
        assert!(segmenter.flush().is_none());
    }

    #[test]
    fn empty_stream_yields_nothing() {
        let mut segmenter = StreamSegmenter::new("|");
        assert!(segmenter.feed("").is_empty());
        assert!(segmenter.flush().is_none());
        assert_eq!(segmenter.full_text(), "");
    }

    #[test]
    fn empty_delimiter_never_splits() {
        let segments = segment_text("a|b", "");
        assert_eq!(texts(&segments), vec!["a|b"]);
    }
}
