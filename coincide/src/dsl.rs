//! JSON query DSL.
//!
//! ```json
//! { "time_window": {
//!     "fields": ["login_at^2", "logout_at"],
//!     "target": "evt-42",
//!     "min_match": 1,
//!     "time_interval": 180000
//! } }
//! ```
//!
//! `target` is either a key string or `{"field": ..., "value": ...}`.
//! `time_interval`, `match_mode`, `boost` and `_name` are optional.

use serde::{Deserialize, Serialize};

use crate::criteria::{FieldBoost, MatchCriteria, MatchMode, DEFAULT_TIME_INTERVAL_MS};
use crate::interface::{CoincideResult, TargetIdentifier, TimeWindowRequest, DEFAULT_BOOST};

/// Outer object name of the query
pub const QUERY_NAME: &str = "time_window";

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    time_window: TimeWindowBody,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimeWindowBody {
    fields: Vec<String>,
    target: TargetIdentifier,
    min_match: i64,
    #[serde(default = "default_time_interval")]
    time_interval: i64,
    #[serde(default)]
    match_mode: MatchMode,
    #[serde(default = "default_boost")]
    boost: f32,
    #[serde(rename = "_name", default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

fn default_time_interval() -> i64 {
    DEFAULT_TIME_INTERVAL_MS
}

fn default_boost() -> f32 {
    DEFAULT_BOOST
}

impl TimeWindowBody {
    fn into_request(self) -> CoincideResult<TimeWindowRequest> {
        let fields = self
            .fields
            .iter()
            .map(|f| f.parse())
            .collect::<CoincideResult<Vec<FieldBoost>>>()?;
        let criteria = MatchCriteria::with_mode(fields, self.min_match, self.time_interval, self.match_mode)?;
        let request = TimeWindowRequest::new(self.target, criteria)?.with_boost(self.boost)?;
        Ok(match self.name {
            Some(name) => request.with_name(name),
            None => request,
        })
    }

    fn from_request(request: &TimeWindowRequest) -> Self {
        let criteria = &request.criteria;
        Self {
            fields: criteria.fields().iter().map(ToString::to_string).collect(),
            target: request.target.clone(),
            min_match: i64::from(criteria.min_match()),
            time_interval: criteria.time_interval(),
            match_mode: criteria.mode(),
            boost: request.boost,
            name: request.name.clone(),
        }
    }
}

/// Parse and validate a DSL document.
pub fn parse_request(json: &str) -> CoincideResult<TimeWindowRequest> {
    let envelope: Envelope = serde_json::from_str(json)?;
    envelope.time_window.into_request()
}

/// Same as [`parse_request`] for an already parsed JSON value.
pub fn request_from_value(value: serde_json::Value) -> CoincideResult<TimeWindowRequest> {
    let envelope: Envelope = serde_json::from_value(value)?;
    envelope.time_window.into_request()
}

pub fn to_value(request: &TimeWindowRequest) -> CoincideResult<serde_json::Value> {
    let envelope = Envelope {
        time_window: TimeWindowBody::from_request(request),
    };
    Ok(serde_json::to_value(envelope)?)
}

pub fn to_json(request: &TimeWindowRequest) -> CoincideResult<String> {
    Ok(serde_json::to_string(&to_value(request)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::CoincideError;
    use serde_json::json;

    #[test]
    fn test_minimal_query_uses_defaults() {
        let req = parse_request(r#"{"time_window": {"fields": ["login_at"], "target": "evt-1", "min_match": 1}}"#)
            .unwrap();
        assert_eq!(req.target, TargetIdentifier::key("evt-1"));
        assert_eq!(req.criteria.time_interval(), DEFAULT_TIME_INTERVAL_MS);
        assert_eq!(req.criteria.mode(), MatchMode::PerField);
        assert_eq!(req.boost, DEFAULT_BOOST);
        assert_eq!(req.name, None);
    }

    #[test]
    fn test_full_query() {
        let req = request_from_value(json!({
            "time_window": {
                "fields": ["login_at^2", "logout_at"],
                "target": {"field": "user", "value": "alice"},
                "min_match": 2,
                "time_interval": 60000,
                "match_mode": "distinct_fields",
                "boost": 1.5,
                "_name": "near-login"
            }
        }))
        .unwrap();
        assert_eq!(req.target, TargetIdentifier::field_value("user", "alice"));
        assert_eq!(req.criteria.field_names(), vec!["login_at", "logout_at"]);
        assert_eq!(req.criteria.fields()[0].boost, 2.0);
        assert_eq!(req.criteria.min_match(), 2);
        assert_eq!(req.criteria.mode(), MatchMode::DistinctFields);
        assert_eq!(req.boost, 1.5);
        assert_eq!(req.name.as_deref(), Some("near-login"));
    }

    #[test]
    fn test_serializes_back_to_same_request() {
        let original = json!({
            "time_window": {
                "fields": ["login_at^2", "logout_at"],
                "target": "evt-9",
                "min_match": 1,
                "time_interval": 500,
                "match_mode": "per_field",
                "boost": 1.0,
                "_name": "q"
            }
        });
        let req = request_from_value(original.clone()).unwrap();
        assert_eq!(to_value(&req).unwrap(), original);
        assert_eq!(parse_request(&to_json(&req).unwrap()).unwrap(), req);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = parse_request(r#"{"time_window": {"fields": ["a"], "target": "x", "min_match": 1, "slop": 3}}"#)
            .unwrap_err();
        assert!(matches!(err, CoincideError::Json(_)));
        assert!(parse_request(r#"{"time_range": {}}"#).is_err());
    }

    #[test]
    fn test_missing_required_keys_rejected() {
        assert!(parse_request(r#"{"time_window": {"fields": ["a"], "min_match": 1}}"#).is_err());
        assert!(parse_request(r#"{"time_window": {"target": "x", "min_match": 1}}"#).is_err());
        assert!(parse_request(r#"{"time_window": {"fields": ["a"], "target": "x"}}"#).is_err());
    }

    #[test]
    fn test_semantic_violations_are_configuration_errors() {
        let cases = [
            r#"{"time_window": {"fields": [], "target": "x", "min_match": 1}}"#,
            r#"{"time_window": {"fields": ["a"], "target": "x", "min_match": 0}}"#,
            r#"{"time_window": {"fields": ["a"], "target": "", "min_match": 1}}"#,
            r#"{"time_window": {"fields": ["a"], "target": "x", "min_match": 1, "time_interval": -5}}"#,
            r#"{"time_window": {"fields": ["a^x"], "target": "x", "min_match": 1}}"#,
            r#"{"time_window": {"fields": ["a"], "target": "x", "min_match": 1, "boost": -1.0}}"#,
        ];
        for case in cases {
            let err = parse_request(case).unwrap_err();
            assert!(matches!(err, CoincideError::Configuration(_)), "{case}: {err:?}");
        }
    }
}
