use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("offset {offset} out of range (buffer length {len})")]
    OffsetOutOfRange { offset: usize, len: usize },
    #[error("line {line} out of range (line count {count})")]
    LineOutOfRange { line: usize, count: usize },
    #[error("column {col} out of range on line {line} (line length {len})")]
    ColumnOutOfRange { line: usize, col: usize, len: usize },
    #[error("invalid edit range {start}..{end}")]
    InvalidRange { start: usize, end: usize },
    #[error("offset {offset} is not on a char boundary")]
    NotCharBoundary { offset: usize },
    #[error("stale token: computed against version {token}, buffer is at {current}")]
    StaleVersion { token: u64, current: u64 },
    #[error("token at {line}:{char} (length {length}) exceeds bounds (limit {limit})")]
    OutOfBounds {
        line: usize,
        char: usize,
        length: usize,
        limit: usize,
    },
    #[error("malformed token data: {0}")]
    MalformedData(String),
}

impl Error {
    /// True for the `OutOfRange` family (offset, line, column or edit range).
    pub fn is_out_of_range(&self) -> bool {
        matches!(
            self,
            Error::OffsetOutOfRange { .. }
                | Error::LineOutOfRange { .. }
                | Error::ColumnOutOfRange { .. }
                | Error::InvalidRange { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
