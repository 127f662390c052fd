use std::ops::Range;

use crate::error::{Error, Result};

/// Start offsets of every line in a text buffer.
///
/// Offsets are UTF-8 byte offsets. A line starts at offset 0 and right after
/// every `\n`, so an empty text still has one (empty) line and a text ending
/// in `\n` has a trailing empty line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl Default for LineIndex {
    fn default() -> Self {
        Self::new("")
    }
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        Self {
            starts: std::iter::once(0)
                .chain(newline_starts(text, 0))
                .collect(),
            len: text.len(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    /// Total length of the indexed text.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn starts(&self) -> &[usize] {
        &self.starts
    }

    pub fn line_start(&self, line: usize) -> Result<usize> {
        self.starts.get(line).copied().ok_or(Error::LineOutOfRange {
            line,
            count: self.line_count(),
        })
    }

    /// End of the line's content, not counting its `\n` terminator.
    pub fn line_end(&self, line: usize) -> Result<usize> {
        self.line_start(line)?;
        Ok(match self.starts.get(line + 1) {
            Some(next) => next - 1,
            None => self.len,
        })
    }

    pub fn line_len(&self, line: usize) -> Result<usize> {
        Ok(self.line_end(line)? - self.line_start(line)?)
    }

    /// Line containing `offset`. `offset == len()` maps to the last line.
    pub fn line_for_offset(&self, offset: usize) -> Result<usize> {
        if offset > self.len {
            return Err(Error::OffsetOutOfRange {
                offset,
                len: self.len,
            });
        }
        // starts[0] == 0, so at least one entry is <= offset
        Ok(self.starts.partition_point(|&s| s <= offset) - 1)
    }

    /// 0-based (line, column) for a byte offset.
    pub fn position(&self, offset: usize) -> Result<(usize, usize)> {
        let line = self.line_for_offset(offset)?;
        Ok((line, offset - self.starts[line]))
    }

    /// Byte offset for a 0-based (line, column). The column may point at the
    /// end of the line's content but not beyond it.
    pub fn offset_at(&self, line: usize, col: usize) -> Result<usize> {
        let len = self.line_len(line)?;
        if col > len {
            return Err(Error::ColumnOutOfRange { line, col, len });
        }
        Ok(self.starts[line] + col)
    }

    /// Patch the table for `range` being replaced by `new_text`.
    ///
    /// Only line starts inside the replaced range are dropped, only
    /// `new_text` is scanned, and starts after the edit are shifted by the
    /// length delta. Entries up to and including the edited line are never
    /// touched.
    pub fn apply_edit(&mut self, range: Range<usize>, new_text: &str) -> Result<()> {
        let Range { start, end } = range;
        if start > end {
            return Err(Error::InvalidRange { start, end });
        }
        if end > self.len {
            return Err(Error::OffsetOutOfRange {
                offset: end,
                len: self.len,
            });
        }

        // A start `s` follows the `\n` at `s - 1`; that newline is deleted
        // iff start <= s - 1 < end.
        let lo = self.starts.partition_point(|&s| s <= start);
        let hi = self.starts.partition_point(|&s| s <= end);

        let removed = end - start;
        let inserted = new_text.len();
        if inserted != removed {
            for s in &mut self.starts[hi..] {
                *s = *s + inserted - removed;
            }
        }
        let replaced = hi - lo;
        self.starts.splice(lo..hi, newline_starts(new_text, start));
        self.len = self.len + inserted - removed;

        log::trace!(
            "line index: edit {}..{} (+{} bytes) dropped {} starts, now {} lines",
            start,
            end,
            inserted,
            replaced,
            self.starts.len()
        );
        Ok(())
    }
}

fn newline_starts(text: &str, base: usize) -> impl Iterator<Item = usize> + '_ {
    text.match_indices('\n').map(move |(i, _)| base + i + 1)
}
