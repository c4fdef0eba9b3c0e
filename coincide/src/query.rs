//! tantivy adapter: the correlation predicate as a `Query`, so it composes
//! with any collector or boolean query.

use std::fmt;
use std::sync::Arc;

use tantivy::query::{EnableScoring, Explanation, Query, Scorer, Weight};
use tantivy::{DocId, DocSet, Score, Searcher, SegmentReader, TantivyError, TERMINATED};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::candidate::{CandidateStream, Confirmation, TwoPhaseScan};
use crate::criteria::MatchCriteria;
use crate::evaluator::MatchEvaluator;
use crate::interface::{CoincideError, CoincideResult, TimeWindowRequest, DEFAULT_BOOST};
use crate::resolver::{resolve, ResolvedTarget};
use crate::source::{SegmentDocs, SegmentInfo, SegmentLayout, TantivySegment, TantivySource};

/// Constant-score time-window query against an already resolved target.
///
/// Only valid against the searcher its layout was captured from: a segment
/// missing from the layout fails the scorer.
#[derive(Clone)]
pub struct TimeWindowQuery {
    target: Arc<ResolvedTarget>,
    criteria: Arc<MatchCriteria>,
    layout: Arc<SegmentLayout>,
    boost: Score,
    name: Option<String>,
    diagnostics: bool,
    cancellation: Option<CancellationToken>,
}

impl TimeWindowQuery {
    pub fn new(target: Arc<ResolvedTarget>, criteria: Arc<MatchCriteria>, layout: Arc<SegmentLayout>) -> Self {
        Self {
            target,
            criteria,
            layout,
            boost: DEFAULT_BOOST,
            name: None,
            diagnostics: false,
            cancellation: None,
        }
    }

    /// Resolve `request` against `searcher` and capture its segment layout.
    pub fn for_request(searcher: &Searcher, key_field: &str, request: &TimeWindowRequest) -> CoincideResult<Self> {
        let source = TantivySource::new(searcher, key_field);
        let target = resolve(&source, &request.target, &request.criteria)?;
        let mut query = Self::new(
            Arc::new(target),
            Arc::new(request.criteria.clone()),
            Arc::new(source.layout().clone()),
        )
        .with_boost(request.boost);
        query.name = request.name.clone();
        Ok(query)
    }

    pub fn with_boost(mut self, boost: Score) -> Self {
        self.boost = boost;
        self
    }

    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    /// Scorers check `token` before each candidate and fail with
    /// `Cancelled` once it fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn target(&self) -> &ResolvedTarget {
        &self.target
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Correlation results never repeat across reader reloads.
    pub fn is_cacheable(&self) -> bool {
        false
    }
}

impl fmt::Debug for TimeWindowQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeWindowQuery")
            .field("target", &self.target.ordinal())
            .field("fields", &self.criteria.field_names())
            .field("min_match", &self.criteria.min_match())
            .field("time_interval", &self.criteria.time_interval())
            .field("boost", &self.boost)
            .field("name", &self.name)
            .field("cancellable", &self.cancellation.is_some())
            .finish()
    }
}

impl Query for TimeWindowQuery {
    fn weight(&self, _scoring: EnableScoring<'_>) -> tantivy::Result<Box<dyn Weight>> {
        Ok(Box::new(TimeWindowWeight {
            target: Arc::clone(&self.target),
            criteria: Arc::clone(&self.criteria),
            layout: Arc::clone(&self.layout),
            boost: self.boost,
            diagnostics: self.diagnostics,
            cancellation: self.cancellation.clone(),
        }))
    }
}

struct TimeWindowWeight {
    target: Arc<ResolvedTarget>,
    criteria: Arc<MatchCriteria>,
    layout: Arc<SegmentLayout>,
    boost: Score,
    diagnostics: bool,
    cancellation: Option<CancellationToken>,
}

impl TimeWindowWeight {
    fn segment_info(&self, reader: &SegmentReader) -> tantivy::Result<SegmentInfo> {
        self.layout.by_segment_id(reader.segment_id()).ok_or_else(|| {
            TantivyError::InvalidArgument(format!(
                "segment {} was not part of the searcher the query was resolved against",
                reader.segment_id().short_uuid_string()
            ))
        })
    }

    fn confirmation<'w, 's>(&'w self, segment: &'s dyn SegmentDocs) -> Confirmation<'w, 's> {
        Confirmation::new(segment, MatchEvaluator::new(&self.criteria, &self.target))
            .with_diagnostics(self.diagnostics)
    }

    fn check_cancelled(&self) -> CoincideResult<()> {
        match &self.cancellation {
            Some(token) if token.is_cancelled() => Err(CoincideError::Cancelled),
            _ => Ok(()),
        }
    }
}

impl Weight for TimeWindowWeight {
    fn scorer(&self, reader: &SegmentReader, boost: Score) -> tantivy::Result<Box<dyn Scorer>> {
        let info = self.segment_info(reader)?;
        let segment = TantivySegment::open(reader, info)?;
        // Errors cannot cross DocSet::advance, so the segment is confirmed here.
        let docs = TwoPhaseScan::new(CandidateStream::new(&segment), self.confirmation(&segment))
            .collect_matches_checked(|| self.check_cancelled())?;
        debug!(segment = info.ord, matched = docs.len(), "segment scored");
        Ok(Box::new(ConstantScoreDocs::new(docs, self.boost * boost)))
    }

    fn explain(&self, reader: &SegmentReader, doc: DocId) -> tantivy::Result<Explanation> {
        let info = self.segment_info(reader)?;
        let segment = TantivySegment::open(reader, info)?;
        let matched = segment.is_alive(doc) && self.confirmation(&segment).confirm(doc)?;
        if !matched {
            return Err(TantivyError::InvalidArgument(format!(
                "document #({}, {doc}) does not match the time window",
                info.ord
            )));
        }
        Ok(Explanation::new("TimeWindowQuery, constant score", self.boost))
    }
}

/// Sorted doc ids that all share one score. Positioned on its first doc.
pub struct ConstantScoreDocs {
    docs: Vec<DocId>,
    cursor: usize,
    score: Score,
}

impl ConstantScoreDocs {
    pub fn new(docs: Vec<DocId>, score: Score) -> Self {
        Self { docs, cursor: 0, score }
    }
}

impl DocSet for ConstantScoreDocs {
    fn advance(&mut self) -> DocId {
        if self.cursor < self.docs.len() {
            self.cursor += 1;
        }
        self.doc()
    }

    fn doc(&self) -> DocId {
        self.docs.get(self.cursor).copied().unwrap_or(TERMINATED)
    }

    fn size_hint(&self) -> u32 {
        (self.docs.len() - self.cursor) as u32
    }
}

impl Scorer for ConstantScoreDocs {
    fn score(&mut self) -> Score {
        self.score
    }
}
