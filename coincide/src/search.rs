//! Host loop: resolve once, scan every segment, merge in segment order.

use std::time::{Duration, Instant};

use rayon::prelude::*;
use tantivy::{DocAddress, DocId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::candidate::{CandidateStream, Confirmation};
use crate::evaluator::MatchEvaluator;
use crate::interface::{CoincideError, CoincideResult, MatchSet, ScoredMatch, TimeWindowRequest};
use crate::resolver::resolve;
use crate::source::{SegmentInfo, SegmentSource, TargetSource};

/// Execution knobs for one query
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Scan segments on the rayon pool instead of one after another
    pub parallel_segments: bool,
    /// Per-candidate `trace!` events
    pub diagnostics: bool,
    /// Give up with `Cancelled` once this much time has passed
    pub timeout: Option<Duration>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            parallel_segments: true,
            diagnostics: false,
            timeout: None,
        }
    }
}

struct SegmentMatches {
    info: SegmentInfo,
    docs: Vec<DocId>,
    scanned: u64,
}

/// Stop signal checked before every confirmation.
struct Interrupt<'a> {
    token: &'a CancellationToken,
    deadline: Option<Instant>,
}

impl Interrupt<'_> {
    fn check(&self) -> CoincideResult<()> {
        if self.token.is_cancelled() {
            return Err(CoincideError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(CoincideError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Run `request` against `source` and collect every confirmed document.
///
/// The target is resolved before any segment is opened. The first storage
/// or evaluation error aborts the whole query, as does cancellation of
/// `token`.
#[instrument(skip_all, fields(target = %request.target, name = request.name.as_deref()))]
pub fn collect_matches<S>(
    source: &S,
    request: &TimeWindowRequest,
    options: &SearchOptions,
    token: &CancellationToken,
) -> CoincideResult<MatchSet>
where
    S: TargetSource + SegmentSource,
{
    #[cfg(feature = "perf-log")]
    let t0 = Instant::now();

    let interrupt = Interrupt {
        token,
        deadline: options.timeout.map(|t| Instant::now() + t),
    };
    interrupt.check()?;

    let target = resolve(source, &request.target, &request.criteria)?;
    let evaluator = MatchEvaluator::new(&request.criteria, &target);

    #[cfg(feature = "perf-log")]
    let t1 = Instant::now();

    let segments = source.segments();
    let scan = |info: &SegmentInfo| scan_segment(source, *info, evaluator, options.diagnostics, &interrupt);
    let scanned: Vec<SegmentMatches> = if options.parallel_segments {
        segments.par_iter().map(scan).collect::<CoincideResult<_>>()?
    } else {
        segments.iter().map(scan).collect::<CoincideResult<_>>()?
    };

    let mut result = MatchSet::default();
    for segment in scanned {
        result.scanned += segment.scanned;
        result.matches.extend(segment.docs.into_iter().map(|doc| ScoredMatch {
            address: DocAddress::new(segment.info.ord, doc),
            ordinal: segment.info.global(doc),
            score: request.boost,
        }));
    }

    #[cfg(feature = "perf-log")]
    eprintln!(
        "[perf] resolve={:.1}ms scan={:.1}ms segments={} scanned={} matched={}",
        (t1 - t0).as_secs_f64() * 1000.0,
        t1.elapsed().as_secs_f64() * 1000.0,
        segments.len(),
        result.scanned,
        result.len()
    );

    debug!(segments = segments.len(), scanned = result.scanned, matched = result.len(), "time window query done");
    Ok(result)
}

fn scan_segment<S>(
    source: &S,
    info: SegmentInfo,
    evaluator: MatchEvaluator<'_>,
    diagnostics: bool,
    interrupt: &Interrupt<'_>,
) -> CoincideResult<SegmentMatches>
where
    S: SegmentSource + ?Sized,
{
    let segment = source.open_segment(info.ord)?;
    let mut stream = CandidateStream::new(segment.as_ref());
    let confirmation = Confirmation::new(segment.as_ref(), evaluator).with_diagnostics(diagnostics);

    let mut matches = SegmentMatches {
        info: confirmation.info(),
        docs: Vec::new(),
        scanned: 0,
    };
    while let Some(doc) = stream.advance() {
        interrupt.check()?;
        matches.scanned += 1;
        if confirmation.confirm(doc)? {
            matches.docs.push(doc);
        }
    }
    debug!(segment = info.ord, scanned = matches.scanned, matched = matches.docs.len(), "segment scanned");
    Ok(matches)
}
