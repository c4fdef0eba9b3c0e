//! Coincide - time-window correlation queries over a tantivy index
//!
//! Given an anchor ("target") event, finds every other event with timestamp
//! values close to the target's in one or more multi-valued fields. Matching
//! is a brute-force scan of every live document plus a two-phase
//! confirmation, and every match scores the same constant boost.
//!
//! Entry points: [`EventIndex::find_correlated`] (synchronous host loop),
//! [`TimeWindowQuery`] (composes with tantivy collectors) and
//! [`CorrelationStore`] (async, cancellable).

pub mod candidate;
pub mod criteria;
pub mod dsl;
pub mod evaluator;
pub mod indexer;
pub mod interface;
pub mod query;
pub mod record;
pub mod resolver;
pub mod search;
pub mod source;
mod store;
pub mod wire;

pub use criteria::{FieldBoost, MatchCriteria, MatchMode, DEFAULT_TIME_INTERVAL_MS};
pub use indexer::{EventDocument, EventIndex, EventSchema, EventTime, KEY_FIELD};
pub use interface::*;
pub use query::TimeWindowQuery;
pub use resolver::{resolve, ResolvedTarget};
pub use search::{collect_matches, SearchOptions};
pub use store::CorrelationStore;
