//! Byte spans of text already claimed by a field

/// Half-open byte range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub(crate) start: usize,
    pub(crate) end: usize,
}

impl Span {
    pub(crate) fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub(crate) fn overlaps(self, other: Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub(crate) fn contains(self, idx: usize) -> bool {
        self.start <= idx && idx < self.end
    }
}

impl From<regex::Match<'_>> for Span {
    fn from(m: regex::Match<'_>) -> Self {
        Self::new(m.start(), m.end())
    }
}

/// Spans removed from the item text
#[derive(Debug, Default, Clone)]
pub(crate) struct Consumed(Vec<Span>);

impl Consumed {
    pub(crate) fn push(&mut self, span: impl Into<Span>) {
        self.0.push(span.into());
    }

    pub(crate) fn overlaps(&self, span: impl Into<Span>) -> bool {
        let span = span.into();
        self.0.iter().any(|s| s.overlaps(span))
    }

    /// Copy of `text` with every consumed span replaced by spaces
    pub(crate) fn blank_out(&self, text: &str) -> String {
        text.char_indices()
            .map(|(idx, c)| {
                if self.0.iter().any(|s| s.contains(idx)) {
                    ' '
                } else {
                    c
                }
            })
            .collect()
    }
}
