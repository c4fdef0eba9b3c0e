//! Coincide public interface
//!
//! Shared types that cross module boundaries: the error enum, target
//! identifiers, match results and the async service trait.

use std::fmt;

use serde::{Deserialize, Serialize};
use tantivy::{DocAddress, Score};
use thiserror::Error;

use crate::criteria::MatchCriteria;

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for every coincide operation
#[derive(Debug, Error)]
pub enum CoincideError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("target document not found for identifier {identifier}")]
    TargetNotFound { identifier: String },
    #[error("evaluation failed: field [{field}] holds non-numeric value [{value}]")]
    MalformedValue { field: String, value: String },
    #[error("Tantivy error: {0}")]
    Index(#[from] tantivy::TantivyError),
    #[error("Directory error: {0}")]
    OpenDirectory(#[from] tantivy::directory::error::OpenDirectoryError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Operation cancelled")]
    Cancelled,
}

pub type CoincideResult<T> = Result<T, CoincideError>;

impl CoincideError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        CoincideError::Configuration(msg.into())
    }
}

/// tantivy's `Weight` contract only carries `TantivyError`, so evaluation
/// failures inside a scorer are folded into `InvalidArgument`.
impl From<CoincideError> for tantivy::TantivyError {
    fn from(e: CoincideError) -> Self {
        match e {
            CoincideError::Index(inner) => inner,
            other => tantivy::TantivyError::InvalidArgument(other.to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TARGETS
// ═══════════════════════════════════════════════════════════════════════════════

/// Selects the anchor document a query compares candidates against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetIdentifier {
    /// Exact lookup on the index's unique key field
    Key(String),
    /// Exact lookup on an arbitrary exact-match field
    FieldValue { field: String, value: String },
}

impl TargetIdentifier {
    pub fn key(key: impl Into<String>) -> Self {
        TargetIdentifier::Key(key.into())
    }

    pub fn field_value(field: impl Into<String>, value: impl Into<String>) -> Self {
        TargetIdentifier::FieldValue {
            field: field.into(),
            value: value.into(),
        }
    }

    pub(crate) fn validate(&self) -> CoincideResult<()> {
        match self {
            TargetIdentifier::Key(key) if key.is_empty() => {
                Err(CoincideError::config("target identifier is empty"))
            }
            TargetIdentifier::FieldValue { field, .. } if field.is_empty() => {
                Err(CoincideError::config("target field name is empty"))
            }
            TargetIdentifier::FieldValue { value, .. } if value.is_empty() => {
                Err(CoincideError::config("target field value is empty"))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for TargetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetIdentifier::Key(key) => write!(f, "[{key}]"),
            TargetIdentifier::FieldValue { field, value } => write!(f, "[{field}={value}]"),
        }
    }
}

/// Position of a document in the searcher-wide ordinal space
/// (segment base offset + segment-local doc id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalOrdinal(pub u64);

impl GlobalOrdinal {
    pub fn new(base: u64, doc: tantivy::DocId) -> Self {
        GlobalOrdinal(base + u64::from(doc))
    }
}

impl fmt::Display for GlobalOrdinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REQUESTS AND RESULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default query boost; every match scores exactly this.
pub const DEFAULT_BOOST: Score = 1.0;

/// A fully validated time-window query as received from the DSL or the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeWindowRequest {
    pub target: TargetIdentifier,
    pub criteria: MatchCriteria,
    pub boost: Score,
    pub name: Option<String>,
}

impl TimeWindowRequest {
    pub fn new(target: TargetIdentifier, criteria: MatchCriteria) -> CoincideResult<Self> {
        target.validate()?;
        Ok(Self {
            target,
            criteria,
            boost: DEFAULT_BOOST,
            name: None,
        })
    }

    pub fn with_boost(mut self, boost: Score) -> CoincideResult<Self> {
        if !boost.is_finite() || boost < 0.0 {
            return Err(CoincideError::config(format!("invalid query boost [{boost}]")));
        }
        self.boost = boost;
        Ok(self)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// One confirmed candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredMatch {
    pub address: DocAddress,
    pub ordinal: GlobalOrdinal,
    pub score: Score,
}

/// Confirmed matches of one query execution, in global ordinal order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchSet {
    pub matches: Vec<ScoredMatch>,
    pub scanned: u64,
}

impl MatchSet {
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn ordinals(&self) -> Vec<GlobalOrdinal> {
        self.matches.iter().map(|m| m.ordinal).collect()
    }

    /// Results depend on the live target document and the index state at
    /// execution time, so they are never reusable across reader reloads.
    pub fn is_cacheable(&self) -> bool {
        false
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERVICE INTERFACE
// ═══════════════════════════════════════════════════════════════════════════════

/// Async entry point for correlation queries.
#[async_trait::async_trait]
pub trait CorrelationApi: Send + Sync {
    /// Resolve the target and return every document correlated with it.
    async fn find_correlated(&self, request: TimeWindowRequest) -> CoincideResult<MatchSet>;

    /// Same as `find_correlated`, starting from the JSON query DSL.
    async fn find_correlated_json(&self, query: String) -> CoincideResult<MatchSet>;

    /// Number of live documents visible to queries
    fn num_docs(&self) -> u64;
}
