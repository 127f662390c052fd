//! Resolve absolute semantic tokens into buffer ranges.
//!
//! `Strict` fails on any token that does not fit the buffer. `Clamp` trims a
//! token's length to the rest of its line and, in batches, skips tokens that
//! cannot be placed at all. A token computed against another buffer version
//! is never resolved in either mode.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::str::FromStr;
use std::sync::mpsc::Sender;

use crate::error::{Error, Result};
use crate::line_index::LineIndex;
use crate::semantic_tokens::SemanticToken;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveMode {
    Strict,
    #[default]
    Clamp,
}

impl FromStr for ResolveMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ResolveMode::Strict),
            "clamp" | "best-effort" | "best_effort" => Ok(ResolveMode::Clamp),
            other => Err(format!("unknown resolve mode: {other}")),
        }
    }
}

/// A half-open byte range, valid only for buffer `version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedRange {
    pub start: usize,
    pub end: usize,
    pub version: u64,
}

impl ResolvedRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Fails with `StaleVersion` unless the range was resolved at `current`.
    pub fn ensure_current(&self, current: u64) -> Result<()> {
        check_version(self.version, current)
    }
}

fn check_version(token: u64, current: u64) -> Result<()> {
    if token != current {
        return Err(Error::StaleVersion { token, current });
    }
    Ok(())
}

fn out_of_bounds(token: &SemanticToken, limit: usize) -> Error {
    Error::OutOfBounds {
        line: token.line as usize,
        char: token.char as usize,
        length: token.length as usize,
        limit,
    }
}

fn token_line_start(token: &SemanticToken, index: &LineIndex) -> Result<usize> {
    index
        .line_start(token.line as usize)
        .map_err(|_| out_of_bounds(token, index.line_count()))
}

/// Strict resolution: the whole token must lie inside the buffer.
pub fn resolve(token: &SemanticToken, index: &LineIndex, current_version: u64) -> Result<ResolvedRange> {
    check_version(token.version, current_version)?;
    let start = token_line_start(token, index)? + token.char as usize;
    let end = start + token.length as usize;
    if end > index.len() {
        return Err(out_of_bounds(token, index.len()));
    }
    Ok(ResolvedRange {
        start,
        end,
        version: current_version,
    })
}

/// Clamping resolution: the start must lie on the token's line, the length
/// is cut at the end of that line's content.
pub fn resolve_clamped(
    token: &SemanticToken,
    index: &LineIndex,
    current_version: u64,
) -> Result<ResolvedRange> {
    check_version(token.version, current_version)?;
    let line_start = token_line_start(token, index)?;
    let line_end = index.line_end(token.line as usize)?;
    let start = line_start + token.char as usize;
    if start > line_end {
        return Err(out_of_bounds(token, line_end));
    }
    let end = (start + token.length as usize).min(line_end);
    Ok(ResolvedRange {
        start,
        end,
        version: current_version,
    })
}

pub fn resolve_with(
    mode: ResolveMode,
    token: &SemanticToken,
    index: &LineIndex,
    current_version: u64,
) -> Result<ResolvedRange> {
    match mode {
        ResolveMode::Strict => resolve(token, index, current_version),
        ResolveMode::Clamp => resolve_clamped(token, index, current_version),
    }
}

/// Resolves tokens under one mode and reports skipped tokens on an optional
/// error channel.
#[derive(Debug, Clone, Default)]
pub struct RangeMapper {
    mode: ResolveMode,
    errors: Option<Sender<Error>>,
}

impl RangeMapper {
    pub fn new(mode: ResolveMode) -> Self {
        Self { mode, errors: None }
    }

    pub fn with_error_channel(mut self, errors: Sender<Error>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn mode(&self) -> ResolveMode {
        self.mode
    }

    pub fn resolve(&self, token: &SemanticToken, index: &LineIndex, current_version: u64) -> Result<ResolvedRange> {
        resolve_with(self.mode, token, index, current_version)
    }

    /// Lazily resolve `tokens`. In strict mode the first failure is yielded
    /// and ends the batch; otherwise failures are reported and skipped.
    pub fn resolve_batch<'a, I>(
        &'a self,
        tokens: I,
        index: &'a LineIndex,
        current_version: u64,
    ) -> ResolveBatch<'a, I::IntoIter>
    where
        I: IntoIterator<Item = &'a SemanticToken>,
    {
        ResolveBatch {
            mapper: self,
            tokens: tokens.into_iter(),
            index,
            version: current_version,
            done: false,
        }
    }

    /// Resolve a whole batch across the rayon pool. Output keeps input order.
    ///
    /// In strict mode the first failing token in input order is returned as
    /// the error. In clamp mode failures are skipped and reported like in
    /// [`RangeMapper::resolve_batch`].
    pub fn resolve_batch_par(
        &self,
        tokens: &[SemanticToken],
        index: &LineIndex,
        current_version: u64,
    ) -> Result<Vec<ResolvedRange>> {
        match self.mode {
            ResolveMode::Strict => tokens
                .par_iter()
                .map(|t| resolve(t, index, current_version))
                .collect::<Vec<_>>()
                .into_iter()
                .collect(),
            ResolveMode::Clamp => Ok(tokens
                .par_iter()
                .filter_map(|t| match self.resolve(t, index, current_version) {
                    Ok(r) => Some(r),
                    Err(e) => {
                        self.report(e);
                        None
                    }
                })
                .collect()),
        }
    }

    fn report(&self, err: Error) {
        log::warn!("resolve: skipping token: {}", err);
        if let Some(tx) = &self.errors {
            // receiver gone means nobody is listening anymore
            let _ = tx.send(err);
        }
    }
}

pub struct ResolveBatch<'a, I> {
    mapper: &'a RangeMapper,
    tokens: I,
    index: &'a LineIndex,
    version: u64,
    done: bool,
}

impl<'a, I> ResolveBatch<'a, I>
where
    I: Iterator<Item = &'a SemanticToken>,
{
    /// Yield each resolved range together with the token it came from.
    pub fn with_tokens(self) -> WithTokens<'a, I> {
        WithTokens(self)
    }

    fn next_pair(&mut self) -> Option<Result<(&'a SemanticToken, ResolvedRange)>> {
        if self.done {
            return None;
        }
        for token in self.tokens.by_ref() {
            match self.mapper.resolve(token, self.index, self.version) {
                Ok(range) => return Some(Ok((token, range))),
                Err(e) if self.mapper.mode == ResolveMode::Strict => {
                    self.done = true;
                    return Some(Err(e));
                }
                Err(e) => self.mapper.report(e),
            }
        }
        self.done = true;
        None
    }
}

impl<'a, I> Iterator for ResolveBatch<'a, I>
where
    I: Iterator<Item = &'a SemanticToken>,
{
    type Item = Result<ResolvedRange>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_pair().map(|r| r.map(|(_, range)| range))
    }
}

pub struct WithTokens<'a, I>(ResolveBatch<'a, I>);

impl<'a, I> Iterator for WithTokens<'a, I>
where
    I: Iterator<Item = &'a SemanticToken>,
{
    type Item = Result<(&'a SemanticToken, ResolvedRange)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next_pair()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::legend::{ModifierSet, TokenType};
    use std::sync::mpsc;

    fn tok(line: u32, char: u32, length: u32, version: u64) -> SemanticToken {
        SemanticToken {
            line,
            char,
            length,
            token_type: TokenType::Known(0),
            modifiers: ModifierSet::default(),
            version,
        }
    }

    #[test]
    fn resolves_against_line_start() {
        let idx = LineIndex::new("ab\ncd\n");
        let r = resolve(&tok(1, 1, 1, 0), &idx, 0).unwrap();
        assert_eq!(r, ResolvedRange { start: 4, end: 5, version: 0 });
        assert_eq!(resolve(&tok(1, 1, 1, 0), &idx, 0).unwrap(), r);
    }

    #[test]
    fn stale_token_fails_in_every_mode() {
        let idx = LineIndex::new("ab\ncd\n");
        for mode in [ResolveMode::Strict, ResolveMode::Clamp] {
            assert_eq!(
                resolve_with(mode, &tok(0, 0, 1, 1), &idx, 2),
                Err(Error::StaleVersion { token: 1, current: 2 })
            );
        }
    }

    #[test]
    fn strict_rejects_past_buffer_end() {
        let idx = LineIndex::new("ab\ncd");
        assert!(matches!(resolve(&tok(1, 1, 5, 0), &idx, 0), Err(Error::OutOfBounds { limit: 5, .. })));
        // a token may run over a line end as long as it stays in the buffer
        assert_eq!(resolve(&tok(0, 1, 3, 0), &idx, 0).unwrap().range(), 1..4);
    }

    #[test]
    fn clamp_trims_to_line_content() {
        let idx = LineIndex::new("ab\ncd\n");
        assert_eq!(resolve_clamped(&tok(0, 1, 10, 0), &idx, 0).unwrap().range(), 1..2);
        assert_eq!(resolve_clamped(&tok(1, 2, 1, 0), &idx, 0).unwrap().range(), 5..5);
        assert!(matches!(resolve_clamped(&tok(1, 3, 1, 0), &idx, 0), Err(Error::OutOfBounds { .. })));
        assert!(matches!(resolve_clamped(&tok(9, 0, 1, 0), &idx, 0), Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn strict_batch_stops_at_first_failure() {
        let idx = LineIndex::new("a\nb\nc");
        let tokens = [tok(0, 0, 1, 0), tok(5, 0, 1, 0), tok(2, 0, 1, 0)];
        let mapper = RangeMapper::new(ResolveMode::Strict);
        let out: Vec<_> = mapper.resolve_batch(&tokens, &idx, 0).collect();
        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert!(matches!(out[1], Err(Error::OutOfBounds { line: 5, .. })));
        let all: Result<Vec<_>> = mapper.resolve_batch(&tokens, &idx, 0).collect();
        assert!(all.is_err());
    }

    #[test]
    fn best_effort_batch_skips_and_reports() {
        let idx = LineIndex::new("a\nb\nc");
        let tokens = [tok(0, 0, 1, 0), tok(5, 0, 1, 0), tok(2, 0, 1, 0)];
        let (tx, rx) = mpsc::channel();
        let mapper = RangeMapper::new(ResolveMode::Clamp).with_error_channel(tx);
        let out: Vec<_> = mapper
            .resolve_batch(&tokens, &idx, 0)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(out.iter().map(|r| r.start).collect::<Vec<_>>(), vec![0, 4]);
        let reported: Vec<Error> = rx.try_iter().collect();
        assert_eq!(reported.len(), 1);
        assert!(matches!(reported[0], Error::OutOfBounds { line: 5, .. }));
    }

    #[test]
    fn batch_is_lazy() {
        let idx = LineIndex::new("abc");
        let tokens = [tok(0, 0, 1, 0), tok(0, 1, 1, 0), tok(0, 2, 1, 0)];
        let mapper = RangeMapper::default();
        let mut batch = mapper.resolve_batch(&tokens, &idx, 0).with_tokens();
        let (first, range) = batch.next().unwrap().unwrap();
        assert_eq!(first, &tokens[0]);
        assert_eq!(range.range(), 0..1);
        assert_eq!(batch.count(), 2);
    }

    #[test]
    fn parallel_batch_keeps_order() {
        let text: String = (0..200).map(|i| format!("line {i}\n")).collect();
        let idx = LineIndex::new(&text);
        let tokens: Vec<_> = (0..250).map(|l| tok(l, 0, 4, 3)).collect();
        let mapper = RangeMapper::new(ResolveMode::Clamp);
        let par = mapper.resolve_batch_par(&tokens, &idx, 3).unwrap();
        let seq: Vec<_> = mapper.resolve_batch(&tokens, &idx, 3).collect::<Result<_>>().unwrap();
        assert_eq!(par.len(), 201);
        assert_eq!(par, seq);
    }

    #[test]
    fn strict_parallel_batch_fails_on_first_bad_token() {
        let idx = LineIndex::new("a\nb\nc");
        let tokens = [tok(0, 0, 1, 0), tok(5, 0, 1, 0), tok(2, 0, 1, 0), tok(7, 0, 1, 0)];
        let (tx, rx) = mpsc::channel();
        let mapper = RangeMapper::new(ResolveMode::Strict).with_error_channel(tx);
        let err = mapper.resolve_batch_par(&tokens, &idx, 0).unwrap_err();
        assert!(matches!(err, Error::OutOfBounds { line: 5, .. }));
        // strict failures are returned, not reported
        assert_eq!(rx.try_iter().count(), 0);

        let ok = mapper.resolve_batch_par(&tokens[..1], &idx, 0).unwrap();
        assert_eq!(ok.iter().map(|r| r.range()).collect::<Vec<_>>(), vec![0..1]);
    }

    #[test]
    fn mode_from_str() {
        assert_eq!("STRICT".parse::<ResolveMode>(), Ok(ResolveMode::Strict));
        assert_eq!("best-effort".parse::<ResolveMode>(), Ok(ResolveMode::Clamp));
        assert!("loose".parse::<ResolveMode>().is_err());
    }
}
