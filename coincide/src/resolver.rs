//! Target resolution: find the anchor document once per query and snapshot
//! the numeric values of the configured fields.

use std::collections::HashMap;

use tracing::{debug, instrument};

use crate::criteria::MatchCriteria;
use crate::interface::{CoincideError, CoincideResult, GlobalOrdinal, TargetIdentifier};
use crate::source::TargetSource;

/// Immutable snapshot of the anchor document. Shared read-only (behind an
/// `Arc`) by every segment evaluation of one query execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    ordinal: GlobalOrdinal,
    fields: HashMap<String, Vec<i64>>,
}

impl ResolvedTarget {
    pub fn new(ordinal: GlobalOrdinal, fields: HashMap<String, Vec<i64>>) -> Self {
        Self { ordinal, fields }
    }

    pub fn ordinal(&self) -> GlobalOrdinal {
        self.ordinal
    }

    /// Values of `field`; empty when the target lacks it.
    pub fn values(&self, field: &str) -> &[i64] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Resolve `identifier` against the whole-index view of `source`.
///
/// Criteria fields the source cannot read back are a `Configuration` error,
/// raised before the lookup. Zero hits is `TargetNotFound`. Several hits
/// resolve to one of them with no ordering guarantee. Malformed target
/// values abort resolution.
#[instrument(skip(source, criteria), fields(target = %identifier))]
pub fn resolve<S>(source: &S, identifier: &TargetIdentifier, criteria: &MatchCriteria) -> CoincideResult<ResolvedTarget>
where
    S: TargetSource + ?Sized,
{
    identifier.validate()?;
    let names = criteria.field_names();
    source.validate_fields(&names)?;

    let (field, value) = match identifier {
        TargetIdentifier::Key(key) => (source.key_field(), key.as_str()),
        TargetIdentifier::FieldValue { field, value } => (field.as_str(), value.as_str()),
    };

    let ordinal = source
        .lookup(field, value)?
        .ok_or_else(|| CoincideError::TargetNotFound {
            identifier: identifier.to_string(),
        })?;

    let raw = source.fetch(ordinal, &names)?;
    let fields = names
        .iter()
        .map(|name| Ok((name.to_string(), raw.time_values(name)?)))
        .collect::<CoincideResult<HashMap<_, _>>>()?;

    debug!(%ordinal, "target resolved");
    Ok(ResolvedTarget::new(ordinal, fields))
}
