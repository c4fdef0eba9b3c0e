//! Raw stored values and per-candidate records.
//!
//! Values arrive from the document store as text (epoch-millisecond strings)
//! or native integers and are parsed lazily, one field at a time, when the
//! evaluator actually reaches that field.

use std::collections::HashMap;

use tantivy::schema::Value;
use tantivy::DocId;

use crate::interface::{CoincideError, CoincideResult, GlobalOrdinal};

/// A single stored value as the document store returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Text(String),
    Int(i64),
    /// A stored value with no integer reading (float, bytes, facet...).
    Other(String),
}

impl RawValue {
    /// Interpret the value as epoch milliseconds.
    pub fn to_millis(&self, field: &str) -> CoincideResult<i64> {
        match self {
            RawValue::Int(v) => Ok(*v),
            RawValue::Text(s) => s.parse::<i64>().map_err(|_| malformed(field, s)),
            RawValue::Other(s) => Err(malformed(field, s)),
        }
    }
}

impl RawValue {
    /// Read a stored tantivy value. Text stays text and is parsed later;
    /// integers and dates become milliseconds right away.
    pub fn from_stored<'a, V: Value<'a>>(value: V) -> Self {
        if let Some(s) = value.as_str() {
            return RawValue::Text(s.to_string());
        }
        if let Some(v) = value.as_i64() {
            return RawValue::Int(v);
        }
        if let Some(v) = value.as_u64() {
            return match i64::try_from(v) {
                Ok(v) => RawValue::Int(v),
                Err(_) => RawValue::Other(v.to_string()),
            };
        }
        if let Some(d) = value.as_datetime() {
            return RawValue::Int(d.into_timestamp_millis());
        }
        match value.as_f64() {
            Some(f) => RawValue::Other(f.to_string()),
            None => RawValue::Other("<non-scalar>".to_string()),
        }
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Text(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::Text(s)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Int(v)
    }
}

fn malformed(field: &str, value: &str) -> CoincideError {
    CoincideError::MalformedValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

/// Field name → ordered raw values, restricted to the fields that were asked for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDocument {
    values: HashMap<String, Vec<RawValue>>,
}

impl RawDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, value: RawValue) {
        self.values.entry(field.to_string()).or_default().push(value);
    }

    pub fn with<I, V>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<RawValue>,
    {
        for value in values {
            self.push(field, value.into());
        }
        self
    }

    /// Raw values of `field`; absent fields read as empty.
    pub fn raw(&self, field: &str) -> &[RawValue] {
        self.values.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Parsed millisecond values of `field`. Any malformed value is fatal.
    pub fn time_values(&self, field: &str) -> CoincideResult<Vec<i64>> {
        self.raw(field).iter().map(|v| v.to_millis(field)).collect()
    }

    /// Keep only the requested fields
    pub fn project(mut self, fields: &[&str]) -> Self {
        self.values.retain(|name, _| fields.contains(&name.as_str()));
        self
    }
}

/// One candidate under confirmation. Fetched, inspected, dropped.
#[derive(Debug)]
pub struct CandidateRecord {
    pub doc: DocId,
    pub ordinal: GlobalOrdinal,
    raw: RawDocument,
}

impl CandidateRecord {
    pub fn new(doc: DocId, ordinal: GlobalOrdinal, raw: RawDocument) -> Self {
        Self { doc, ordinal, raw }
    }

    pub fn time_values(&self, field: &str) -> CoincideResult<Vec<i64>> {
        self.raw.time_values(field)
    }

    pub fn raw(&self) -> &RawDocument {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_values_parse_as_millis() {
        let doc = RawDocument::new()
            .with("k1", ["1000", "-25"])
            .with("k1", [7i64]);
        assert_eq!(doc.time_values("k1").unwrap(), vec![1000, -25, 7]);
    }

    #[test]
    fn test_missing_field_is_empty() {
        let doc = RawDocument::new().with("k1", ["1000"]);
        assert!(doc.time_values("k2").unwrap().is_empty());
        assert!(doc.raw("k2").is_empty());
    }

    #[test]
    fn test_malformed_value_names_field() {
        let doc = RawDocument::new().with("k1", ["1000", "yesterday"]);
        match doc.time_values("k1") {
            Err(CoincideError::MalformedValue { field, value }) => {
                assert_eq!(field, "k1");
                assert_eq!(value, "yesterday");
            }
            other => panic!("expected MalformedValue, got {:?}", other),
        }
    }

    #[test]
    fn test_whitespace_is_not_trimmed() {
        let doc = RawDocument::new().with("k1", [" 1000"]);
        assert!(doc.time_values("k1").is_err());
    }

    #[test]
    fn test_stored_value_conversion() {
        use tantivy::schema::OwnedValue;

        assert_eq!(RawValue::from_stored(&OwnedValue::I64(-4)), RawValue::Int(-4));
        assert_eq!(RawValue::from_stored(&OwnedValue::U64(12)), RawValue::Int(12));
        assert!(matches!(RawValue::from_stored(&OwnedValue::U64(u64::MAX)), RawValue::Other(_)));
        assert_eq!(
            RawValue::from_stored(&OwnedValue::Str("42".to_string())),
            RawValue::Text("42".to_string())
        );
        assert!(RawValue::from_stored(&OwnedValue::F64(1.5)).to_millis("k").is_err());
    }

    #[test]
    fn test_project_drops_unrequested_fields() {
        let doc = RawDocument::new()
            .with("k1", ["1"])
            .with("k2", ["2"])
            .project(&["k2"]);
        assert!(doc.raw("k1").is_empty());
        assert_eq!(doc.time_values("k2").unwrap(), vec![2]);
    }
}
