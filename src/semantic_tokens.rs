//! Delta-encoded semantic token streams.
//!
//! Servers send tokens as flat groups of five `u32`s: line delta, start
//! delta, length, type index and modifier bits. Each token is relative to
//! the previous one: on the same line the start accumulates, on a new line
//! it resets.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::legend::{Legend, ModifierSet, TokenType};

/// One token exactly as it appears on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawToken {
    pub delta_line: u32,
    pub delta_start: u32,
    pub length: u32,
    pub token_type: u32,
    pub token_modifiers: u32,
}

impl From<[u32; 5]> for RawToken {
    fn from(v: [u32; 5]) -> Self {
        Self {
            delta_line: v[0],
            delta_start: v[1],
            length: v[2],
            token_type: v[3],
            token_modifiers: v[4],
        }
    }
}

impl From<RawToken> for [u32; 5] {
    fn from(t: RawToken) -> Self {
        [t.delta_line, t.delta_start, t.length, t.token_type, t.token_modifiers]
    }
}

/// A token in absolute coordinates, stamped with the buffer version the
/// server computed it against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SemanticToken {
    pub line: u32,
    pub char: u32,
    pub length: u32,
    pub token_type: TokenType,
    pub modifiers: ModifierSet,
    pub version: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenBatch {
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    pub tokens: Vec<SemanticToken>,
}

/// One `semanticTokens/full/delta` edit over the flat `u32` array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokensEdit {
    pub start: u32,
    pub delete_count: u32,
    #[serde(default)]
    pub data: Option<Vec<u32>>,
}

/// Fails with `MalformedData` if an absolute line or start would overflow
/// `u32`; such a stream cannot be re-encoded faithfully.
pub fn decode(raw: &[RawToken], legend: &Legend, version: u64) -> Result<TokenBatch> {
    let tokens = raw
        .iter()
        .enumerate()
        .scan((0u32, 0u32), |(line, char), (i, r)| {
            let next = if r.delta_line == 0 {
                char.checked_add(r.delta_start).map(|c| (*line, c))
            } else {
                line.checked_add(r.delta_line).map(|l| (l, r.delta_start))
            };
            let Some((l, c)) = next else {
                return Some(Err(Error::MalformedData(format!(
                    "token {} overflows absolute position (line {}, char {})",
                    i, line, char
                ))));
            };
            *line = l;
            *char = c;
            Some(Ok(SemanticToken {
                line: l,
                char: c,
                length: r.length,
                token_type: legend.token_type(r.token_type),
                modifiers: legend.modifiers(r.token_modifiers),
                version,
            }))
        })
        .collect::<Result<Vec<_>>>()?;
    let unknown = tokens.iter().filter(|t| t.token_type.is_unknown()).count();
    if unknown > 0 {
        log::debug!("decode: {} of {} tokens use types outside the legend", unknown, tokens.len());
    }
    Ok(TokenBatch {
        version,
        result_id: None,
        tokens,
    })
}

/// Decode the flat `data` array of a semantic tokens response.
pub fn decode_data(data: &[u32], legend: &Legend, version: u64) -> Result<TokenBatch> {
    if data.len() % 5 != 0 {
        return Err(Error::MalformedData(format!(
            "token data length {} is not a multiple of 5",
            data.len()
        )));
    }
    let raw: Vec<RawToken> = data
        .chunks_exact(5)
        .map(|c| RawToken::from([c[0], c[1], c[2], c[3], c[4]]))
        .collect();
    decode(&raw, legend, version)
}

/// Inverse of [`decode`]. Fails with `MalformedData` if the tokens are not
/// in document order.
pub fn encode(tokens: &[SemanticToken]) -> Result<Vec<RawToken>> {
    tokens
        .iter()
        .enumerate()
        .scan((0u32, 0u32), |(line, char), (i, t)| {
            let delta = t.line.checked_sub(*line).and_then(|delta_line| {
                let delta_start = if delta_line == 0 { t.char.checked_sub(*char)? } else { t.char };
                Some((delta_line, delta_start))
            });
            let Some((delta_line, delta_start)) = delta else {
                return Some(Err(Error::MalformedData(format!(
                    "token {} at {}:{} precedes {}:{}",
                    i, t.line, t.char, line, char
                ))));
            };
            *line = t.line;
            *char = t.char;
            Some(Ok(RawToken {
                delta_line,
                delta_start,
                length: t.length,
                token_type: t.token_type.index(),
                token_modifiers: t.modifiers.encoded(),
            }))
        })
        .collect()
}

pub fn flatten(raw: &[RawToken]) -> Vec<u32> {
    raw.iter().flat_map(|t| <[u32; 5]>::from(*t)).collect()
}

/// Apply delta edits to a previous response's `data`.
///
/// Edit offsets refer to the array before any edit is applied.
pub fn apply_delta_edits(data: &mut Vec<u32>, edits: &[TokensEdit]) -> Result<()> {
    let mut order: Vec<&TokensEdit> = edits.iter().collect();
    order.sort_by(|a, b| b.start.cmp(&a.start));

    let mut bound = data.len();
    for edit in &order {
        let start = edit.start as usize;
        let end = start + edit.delete_count as usize;
        if end > bound {
            return Err(Error::MalformedData(format!(
                "delta edit {}..{} exceeds token data (length {}) or overlaps a later edit",
                start,
                end,
                data.len()
            )));
        }
        bound = start;
    }
    for edit in order {
        let start = edit.start as usize;
        let end = start + edit.delete_count as usize;
        data.splice(start..end, edit.data.iter().flatten().copied());
    }
    Ok(())
}
