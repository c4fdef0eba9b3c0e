//! Per-segment candidate iteration and two-phase confirmation.
//!
//! `CandidateStream` is the cheap approximation: every live doc of the segment
//! in ascending order. `Confirmation` is the expensive check for the doc the
//! host cursor currently sits on. It is handed a `DocId` and has no way to
//! move the cursor.

use tantivy::DocId;
use tracing::trace;

use crate::evaluator::MatchEvaluator;
use crate::interface::CoincideResult;
use crate::record::CandidateRecord;
use crate::source::{SegmentDocs, SegmentInfo};

/// Ascending live doc ids of one segment. Fresh per query, finite.
pub struct CandidateStream<'s> {
    segment: &'s dyn SegmentDocs,
    max_doc: DocId,
    next: DocId,
    current: Option<DocId>,
}

impl<'s> CandidateStream<'s> {
    /// Unpositioned until the first `advance`.
    pub fn new(segment: &'s dyn SegmentDocs) -> Self {
        Self {
            segment,
            max_doc: segment.info().max_doc,
            next: 0,
            current: None,
        }
    }

    /// Move to the next live doc. `None` once the segment is exhausted.
    pub fn advance(&mut self) -> Option<DocId> {
        while self.next < self.max_doc {
            let doc = self.next;
            self.next += 1;
            if self.segment.is_alive(doc) {
                self.current = Some(doc);
                return self.current;
            }
        }
        self.current = None;
        None
    }

    pub fn doc(&self) -> Option<DocId> {
        self.current
    }

    /// Upper bound on the remaining candidates
    pub fn remaining(&self) -> u32 {
        self.max_doc - self.next
    }
}

/// Phase two for one segment.
pub struct Confirmation<'q, 's> {
    segment: &'s dyn SegmentDocs,
    info: SegmentInfo,
    evaluator: MatchEvaluator<'q>,
    fields: Vec<&'q str>,
    diagnostics: bool,
}

impl<'q, 's> Confirmation<'q, 's> {
    pub fn new(segment: &'s dyn SegmentDocs, evaluator: MatchEvaluator<'q>) -> Self {
        Self {
            segment,
            info: segment.info(),
            fields: evaluator.criteria().field_names(),
            evaluator,
            diagnostics: false,
        }
    }

    /// Emit a `trace!` event per confirmed or rejected candidate.
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    pub fn info(&self) -> SegmentInfo {
        self.info
    }

    /// Decide whether `doc` matches. The target itself is rejected before
    /// its stored fields are read.
    pub fn confirm(&self, doc: DocId) -> CoincideResult<bool> {
        let ordinal = self.info.global(doc);
        if ordinal == self.evaluator.target().ordinal() {
            if self.diagnostics {
                trace!(segment = self.info.ord, doc, %ordinal, "skipping target document");
            }
            return Ok(false);
        }

        let raw = self.segment.fetch(doc, &self.fields)?;
        let candidate = CandidateRecord::new(doc, ordinal, raw);
        let field = self.evaluator.matching_field(&candidate)?;
        if self.diagnostics {
            trace!(segment = self.info.ord, doc, %ordinal, matched = field.is_some(), field, "candidate evaluated");
        }
        Ok(field.is_some())
    }
}

/// Stream and confirmation driven together, for callers that do not need to
/// interleave their own checks between candidates.
pub struct TwoPhaseScan<'q, 's> {
    stream: CandidateStream<'s>,
    confirmation: Confirmation<'q, 's>,
}

impl<'q, 's> TwoPhaseScan<'q, 's> {
    pub fn new(stream: CandidateStream<'s>, confirmation: Confirmation<'q, 's>) -> Self {
        Self { stream, confirmation }
    }

    pub fn advance(&mut self) -> Option<DocId> {
        self.stream.advance()
    }

    pub fn doc(&self) -> Option<DocId> {
        self.stream.doc()
    }

    /// Confirm the current doc. An unpositioned or exhausted scan never matches.
    pub fn matches(&self) -> CoincideResult<bool> {
        match self.stream.doc() {
            Some(doc) => self.confirmation.confirm(doc),
            None => Ok(false),
        }
    }

    /// Advance until the next confirmed doc.
    pub fn next_match(&mut self) -> CoincideResult<Option<DocId>> {
        while let Some(doc) = self.stream.advance() {
            if self.confirmation.confirm(doc)? {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    /// Every remaining confirmed doc, ascending.
    pub fn collect_matches(self) -> CoincideResult<Vec<DocId>> {
        self.collect_matches_checked(|| Ok(()))
    }

    /// Like `collect_matches`, running `check` before each candidate. The
    /// first error from `check` ends the scan.
    pub fn collect_matches_checked<F>(mut self, mut check: F) -> CoincideResult<Vec<DocId>>
    where
        F: FnMut() -> CoincideResult<()>,
    {
        let mut docs = Vec::new();
        while let Some(doc) = self.stream.advance() {
            check()?;
            if self.confirmation.confirm(doc)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}
