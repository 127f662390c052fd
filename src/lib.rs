pub mod buffer;
pub mod config;
pub mod document;
pub mod error;
pub mod legend;
pub mod line_index;
pub mod range_mapper;
pub mod semantic_tokens;

pub use buffer::{Buffer, Snapshot, TextEdit};
pub use config::Config;
pub use document::{Document, Highlight, TokenRequest};
pub use error::{Error, Result};
pub use legend::{Legend, ModifierSet, TokenType};
pub use line_index::LineIndex;
pub use range_mapper::{
    RangeMapper, ResolveBatch, ResolveMode, ResolvedRange, resolve, resolve_clamped, resolve_with,
};
pub use semantic_tokens::{
    RawToken, SemanticToken, TokenBatch, TokensEdit, apply_delta_edits, decode, decode_data,
    encode,
};
