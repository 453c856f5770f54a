//! Source locations for diagnostic reporting.

use std::fmt;

/// File identifier, indexing into whatever file database the caller keeps.
pub type FileId = usize;

/// A range of source code.
///
/// This is added to simplify working with ranges, because [`std::ops::Range`]
/// does not implement [`std::ops::Copy`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Range {
    pub start: usize,
    pub end: usize,
}

impl Range {
    pub fn merge(self, other: Range) -> Range {
        Range {
            start: std::cmp::min(self.start, other.start),
            end: std::cmp::max(self.end, other.end),
        }
    }

    pub fn end(self) -> Range {
        Range {
            start: self.end,
            end: self.end,
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl From<std::ops::Range<usize>> for Range {
    fn from(src: std::ops::Range<usize>) -> Range {
        Range {
            start: src.start,
            end: src.end,
        }
    }
}

impl From<Range> for std::ops::Range<usize> {
    fn from(range: Range) -> std::ops::Range<usize> {
        range.start..range.end
    }
}

/// Data that covers some range of source code.
#[derive(Debug, Clone)]
pub struct Located<Data> {
    pub range: Range,
    pub data: Data,
}

impl<Data> Located<Data> {
    pub fn new(range: impl Into<Range>, data: Data) -> Located<Data> {
        Located {
            range: range.into(),
            data,
        }
    }
}

impl<Data: PartialEq> PartialEq for Located<Data> {
    /// Ignores source location metadata.
    fn eq(&self, other: &Located<Data>) -> bool {
        self.data == other.data
    }
}
