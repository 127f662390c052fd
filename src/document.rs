//! An open document: its buffer, the latest token batch and the token
//! requests still in flight.

use serde::Serialize;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crate::buffer::{Buffer, Snapshot, TextEdit};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::legend::{Legend, ModifierSet, TokenType};
use crate::range_mapper::{RangeMapper, ResolvedRange};
use crate::semantic_tokens::{self, TokenBatch, TokensEdit};

/// A token request issued at one buffer version. Cancelled as soon as the
/// buffer moves past that version.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub version: u64,
    cancelled: Arc<AtomicBool>,
}

impl TokenRequest {
    fn new(version: u64) -> Self {
        Self {
            version,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Decode a response on a worker thread. Yields `None` when the request
    /// was cancelled before or while decoding.
    pub fn spawn_decode(&self, data: Vec<u32>, legend: Arc<Legend>) -> JoinHandle<Option<Result<TokenBatch>>> {
        let request = self.clone();
        std::thread::spawn(move || {
            if request.is_cancelled() {
                return None;
            }
            let batch = semantic_tokens::decode_data(&data, &legend, request.version);
            if request.is_cancelled() {
                log::debug!("document: dropped decode for cancelled v{}", request.version);
                return None;
            }
            Some(batch)
        })
    }
}

/// A resolved token ready for painting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Highlight {
    pub range: ResolvedRange,
    pub token_type: TokenType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub modifiers: ModifierSet,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modifier_names: Vec<String>,
}

#[derive(Debug)]
pub struct Document {
    buffer: Buffer,
    legend: Arc<Legend>,
    mapper: RangeMapper,
    tokens: Option<TokenBatch>,
    data: Option<Vec<u32>>,
    pending: Vec<TokenRequest>,
}

impl Document {
    pub fn open(text: impl Into<String>, config: &Config) -> Self {
        Self {
            buffer: Buffer::new(text),
            legend: Arc::new(config.legend.clone()),
            mapper: RangeMapper::new(config.mode),
            tokens: None,
            data: None,
            pending: Vec::new(),
        }
    }

    pub fn with_mapper(mut self, mapper: RangeMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn version(&self) -> u64 {
        self.buffer.version()
    }

    pub fn legend(&self) -> &Arc<Legend> {
        &self.legend
    }

    pub fn snapshot(&self) -> Snapshot {
        self.buffer.snapshot()
    }

    /// The latest accepted batch, which may be stale after an edit.
    pub fn tokens(&self) -> Option<&TokenBatch> {
        self.tokens.as_ref()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Apply an edit and cancel every request issued before it.
    pub fn edit(&mut self, range: Range<usize>, new_text: &str) -> Result<u64> {
        let version = self.buffer.edit(range, new_text)?;
        for req in self.pending.drain(..) {
            log::debug!("document: cancel token request v{} (now v{})", req.version, version);
            req.cancel();
        }
        Ok(version)
    }

    pub fn apply(&mut self, edit: &TextEdit) -> Result<u64> {
        self.edit(edit.range.clone(), &edit.new_text)
    }

    pub fn request_tokens(&mut self) -> TokenRequest {
        // drop requests the caller gave up on
        self.pending.retain(|p| !p.is_cancelled());
        let req = TokenRequest::new(self.version());
        self.pending.push(req.clone());
        req
    }

    fn accepts(&self, request: &TokenRequest) -> bool {
        if request.is_cancelled() || request.version != self.version() {
            log::debug!(
                "document: discard response for v{} (now v{})",
                request.version,
                self.version()
            );
            return false;
        }
        true
    }

    fn settle(&mut self, request: &TokenRequest) {
        self.pending.retain(|p| !Arc::ptr_eq(&p.cancelled, &request.cancelled));
    }

    /// Accept a full response. Returns `None` if the request is outdated.
    pub fn complete(&mut self, request: &TokenRequest, data: Vec<u32>) -> Result<Option<&TokenBatch>> {
        self.settle(request);
        if !self.accepts(request) {
            return Ok(None);
        }
        let batch = semantic_tokens::decode_data(&data, &self.legend, request.version)?;
        self.data = Some(data);
        Ok(Some(self.replace_tokens(batch)))
    }

    /// Accept a delta response relative to the last full or delta response.
    pub fn complete_delta(
        &mut self,
        request: &TokenRequest,
        edits: &[TokensEdit],
    ) -> Result<Option<&TokenBatch>> {
        self.settle(request);
        if !self.accepts(request) {
            return Ok(None);
        }
        let mut data = self
            .data
            .clone()
            .ok_or_else(|| Error::MalformedData("delta response without a previous result".into()))?;
        semantic_tokens::apply_delta_edits(&mut data, edits)?;
        let batch = semantic_tokens::decode_data(&data, &self.legend, request.version)?;
        self.data = Some(data);
        Ok(Some(self.replace_tokens(batch)))
    }

    /// Install an already decoded batch if it matches the current version.
    ///
    /// Returns `Ok(false)` for a batch from another version and fails with
    /// `MalformedData` if its tokens are not in document order.
    pub fn install(&mut self, batch: TokenBatch) -> Result<bool> {
        if batch.version != self.version() {
            log::debug!("document: reject batch for v{} (now v{})", batch.version, self.version());
            return Ok(false);
        }
        let raw = semantic_tokens::encode(&batch.tokens)?;
        self.data = Some(semantic_tokens::flatten(&raw));
        self.replace_tokens(batch);
        Ok(true)
    }

    fn replace_tokens(&mut self, batch: TokenBatch) -> &TokenBatch {
        log::debug!("document: v{} now has {} tokens", batch.version, batch.tokens.len());
        self.tokens.insert(batch)
    }

    /// Resolve the latest batch against the current buffer.
    pub fn ranges(&self) -> Result<Vec<ResolvedRange>> {
        let Some(batch) = &self.tokens else {
            return Ok(Vec::new());
        };
        self.mapper
            .resolve_batch(&batch.tokens, self.buffer.index(), self.version())
            .collect()
    }

    pub fn highlights(&self) -> Result<Vec<Highlight>> {
        let Some(batch) = &self.tokens else {
            return Ok(Vec::new());
        };
        self.mapper
            .resolve_batch(&batch.tokens, self.buffer.index(), self.version())
            .with_tokens()
            .map(|r| {
                r.map(|(token, range)| Highlight {
                    range,
                    token_type: token.token_type,
                    type_name: self.legend.type_name(token.token_type).map(str::to_owned),
                    modifiers: token.modifiers,
                    modifier_names: self
                        .legend
                        .modifier_names(token.modifiers)
                        .into_iter()
                        .map(str::to_owned)
                        .collect(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_mapper::ResolveMode;

    fn config(mode: ResolveMode) -> Config {
        Config {
            mode,
            legend: Legend::new(vec!["keyword".into(), "function".into()], vec!["static".into()]),
        }
    }

    #[test]
    fn response_for_current_version_is_applied() {
        let mut doc = Document::open("fn main() {}\n", &config(ResolveMode::Strict));
        let req = doc.request_tokens();
        let batch = doc.complete(&req, vec![0, 0, 2, 0, 0, 0, 3, 4, 1, 1]).unwrap().unwrap();
        assert_eq!(batch.tokens.len(), 2);
        assert_eq!(doc.pending(), 0);
        let hl = doc.highlights().unwrap();
        assert_eq!(hl[1].range.range(), 3..7);
        assert_eq!(hl[1].type_name.as_deref(), Some("function"));
        assert_eq!(hl[1].modifier_names, vec!["static"]);
    }

    #[test]
    fn edit_cancels_pending_request() {
        let mut doc = Document::open("let x = 1;\n", &config(ResolveMode::Clamp));
        let req = doc.request_tokens();
        doc.edit(0..0, "\n").unwrap();
        assert!(req.is_cancelled());
        assert!(doc.complete(&req, vec![0, 0, 3, 0, 0]).unwrap().is_none());
        assert!(doc.tokens().is_none());
    }

    #[test]
    fn stale_batch_is_not_rendered() {
        let mut doc = Document::open("let x = 1;\n", &config(ResolveMode::Strict));
        let req = doc.request_tokens();
        doc.complete(&req, vec![0, 0, 3, 0, 0]).unwrap();
        doc.edit(0..0, "\n").unwrap();
        assert_eq!(doc.ranges(), Err(Error::StaleVersion { token: 0, current: 1 }));

        let lenient = Document::open("", &config(ResolveMode::Clamp));
        assert!(lenient.ranges().unwrap().is_empty());
    }

    #[test]
    fn newer_batch_replaces_older() {
        let mut doc = Document::open("abc def\n", &config(ResolveMode::Strict));
        let first = doc.request_tokens();
        let second = doc.request_tokens();
        doc.complete(&first, vec![0, 0, 3, 0, 0]).unwrap();
        doc.complete(&second, vec![0, 4, 3, 1, 0]).unwrap();
        assert_eq!(doc.ranges().unwrap().iter().map(|r| r.range()).collect::<Vec<_>>(), vec![4..7]);
    }

    #[test]
    fn delta_response_patches_previous_data() {
        let mut doc = Document::open("abc def\n", &config(ResolveMode::Strict));
        let req = doc.request_tokens();
        doc.complete(&req, vec![0, 0, 3, 0, 0]).unwrap();
        let req = doc.request_tokens();
        let edits = [TokensEdit { start: 5, delete_count: 0, data: Some(vec![0, 4, 3, 1, 0]) }];
        let batch = doc.complete_delta(&req, &edits).unwrap().unwrap();
        assert_eq!(batch.tokens.len(), 2);
        assert_eq!(batch.tokens[1].char, 4);
    }

    #[test]
    fn delta_without_previous_result_fails() {
        let mut doc = Document::open("abc\n", &config(ResolveMode::Strict));
        let req = doc.request_tokens();
        assert!(matches!(doc.complete_delta(&req, &[]), Err(Error::MalformedData(_))));
    }

    #[test]
    fn install_rejects_unordered_batch() {
        let mut doc = Document::open("ab\ncd\n", &config(ResolveMode::Strict));
        let mut batch = semantic_tokens::decode_data(&[0, 0, 1, 0, 0, 1, 0, 1, 0, 0], doc.legend(), 0).unwrap();
        batch.tokens.reverse();
        assert_eq!(batch.tokens[0].line, 1);
        assert!(matches!(doc.install(batch), Err(Error::MalformedData(_))));
        assert!(doc.tokens().is_none());

        // a delta response still has no base to patch
        let req = doc.request_tokens();
        assert!(matches!(doc.complete_delta(&req, &[]), Err(Error::MalformedData(_))));
    }

    #[test]
    fn abandoned_requests_are_pruned() {
        let mut doc = Document::open("abc\n", &config(ResolveMode::Clamp));
        for _ in 0..10 {
            doc.request_tokens().cancel();
        }
        let live = doc.request_tokens();
        assert_eq!(doc.pending(), 1);
        assert!(!live.is_cancelled());
        doc.complete(&live, vec![0, 0, 3, 0, 0]).unwrap().unwrap();
        assert_eq!(doc.pending(), 0);
    }

    #[test]
    fn background_decode_respects_cancellation() {
        let mut doc = Document::open("abc\n", &config(ResolveMode::Strict));
        let req = doc.request_tokens();
        let batch = req
            .spawn_decode(vec![0, 0, 3, 0, 0], Arc::clone(doc.legend()))
            .join()
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(doc.install(batch.clone()).unwrap());

        doc.edit(3..3, "d").unwrap();
        assert!(!doc.install(batch).unwrap());
        let late = doc.request_tokens();
        late.cancel();
        assert!(late.spawn_decode(vec![0, 0, 1, 0, 0], Arc::clone(doc.legend())).join().unwrap().is_none());
    }
}
