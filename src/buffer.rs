use serde::{Deserialize, Serialize};
use std::ops::{Deref, Range};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::line_index::LineIndex;

/// An edit event from the editing surface: replace `range` with `new_text`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextEdit {
    pub range: Range<usize>,
    pub new_text: String,
}

impl TextEdit {
    pub fn new(range: Range<usize>, new_text: impl Into<String>) -> Self {
        Self {
            range,
            new_text: new_text.into(),
        }
    }

    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self::new(offset..offset, text)
    }

    pub fn delete(range: Range<usize>) -> Self {
        Self::new(range, "")
    }
}

/// Mutable document text with a version counter and its line index.
///
/// The index sits behind an `Arc` and is patched copy-on-write, so snapshots
/// handed to other threads never observe an edit in progress.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    text: String,
    version: u64,
    index: Arc<LineIndex>,
}

/// An immutable view of the line index at one buffer version.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub version: u64,
    index: Arc<LineIndex>,
}

impl Snapshot {
    pub fn index(&self) -> &LineIndex {
        &self.index
    }
}

impl Deref for Snapshot {
    type Target = LineIndex;

    fn deref(&self) -> &LineIndex {
        &self.index
    }
}

impl Buffer {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let index = Arc::new(LineIndex::new(&text));
        Self {
            text,
            version: 0,
            index,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn index(&self) -> &LineIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: self.version,
            index: Arc::clone(&self.index),
        }
    }

    /// Content of `line` without its terminator.
    pub fn line_text(&self, line: usize) -> Result<&str> {
        let start = self.index.line_start(line)?;
        let end = self.index.line_end(line)?;
        Ok(&self.text[start..end])
    }

    /// Replace `range` with `new_text` and return the new version.
    ///
    /// On error neither the text, the index nor the version change.
    pub fn edit(&mut self, range: Range<usize>, new_text: &str) -> Result<u64> {
        let Range { start, end } = range;
        if start > end {
            return Err(Error::InvalidRange { start, end });
        }
        if end > self.text.len() {
            return Err(Error::OffsetOutOfRange {
                offset: end,
                len: self.text.len(),
            });
        }
        for offset in [start, end] {
            if !self.text.is_char_boundary(offset) {
                return Err(Error::NotCharBoundary { offset });
            }
        }

        Arc::make_mut(&mut self.index).apply_edit(start..end, new_text)?;
        self.text.replace_range(start..end, new_text);
        self.version += 1;
        log::debug!(
            "buffer: v{} replaced {}..{} with {} bytes ({} lines)",
            self.version,
            start,
            end,
            new_text.len(),
            self.index.line_count()
        );
        Ok(self.version)
    }

    pub fn apply(&mut self, edit: &TextEdit) -> Result<u64> {
        self.edit(edit.range.clone(), &edit.new_text)
    }
}
