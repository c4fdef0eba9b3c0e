//! Phase-two confirmation: the time-window comparison between one candidate
//! and the resolved target.
//!
//! Per-field mode (the default) walks the configured fields in order. For each
//! field a counter starts at `min_match` and drops by one for every candidate
//! value that lies within `time_interval` (inclusive) of some target value of
//! the same field. The first field whose counter reaches zero confirms the
//! candidate; remaining values and fields are never looked at.

use crate::criteria::{MatchCriteria, MatchMode};
use crate::interface::CoincideResult;
use crate::record::CandidateRecord;
use crate::resolver::ResolvedTarget;

/// True when some target value lies within `interval` of `value`.
#[inline]
fn within(value: i64, targets: &[i64], interval: u64) -> bool {
    targets.iter().any(|&t| value.abs_diff(t) <= interval)
}

/// Whether at least `needed` candidate values fall in the window of some
/// target value. Stops as soon as the count is reached.
pub fn field_satisfied(candidate: &[i64], target: &[i64], interval: i64, needed: u32) -> bool {
    if needed == 0 {
        return true;
    }
    let interval = interval.max(0) as u64;
    let mut counter = needed;
    for &v in candidate {
        if within(v, target, interval) {
            counter -= 1;
            if counter == 0 {
                return true;
            }
        }
    }
    false
}

/// Compares candidates against one resolved target. Borrowed, cheap to build
/// per segment.
#[derive(Debug, Clone, Copy)]
pub struct MatchEvaluator<'q> {
    criteria: &'q MatchCriteria,
    target: &'q ResolvedTarget,
}

impl<'q> MatchEvaluator<'q> {
    pub fn new(criteria: &'q MatchCriteria, target: &'q ResolvedTarget) -> Self {
        Self { criteria, target }
    }

    pub fn criteria(&self) -> &'q MatchCriteria {
        self.criteria
    }

    pub fn target(&self) -> &'q ResolvedTarget {
        self.target
    }

    /// Confirm or reject one candidate. Candidate values are parsed only for
    /// the fields actually inspected; a malformed one is returned as an error.
    pub fn matches(&self, candidate: &CandidateRecord) -> CoincideResult<bool> {
        Ok(self.matching_field(candidate)?.is_some())
    }

    /// The field that confirmed the candidate, if any. In distinct-fields mode
    /// this is the field that completed the count.
    pub fn matching_field(&self, candidate: &CandidateRecord) -> CoincideResult<Option<&'q str>> {
        let interval = self.criteria.time_interval();
        let min_match = self.criteria.min_match();

        match self.criteria.mode() {
            MatchMode::PerField => {
                for field in self.criteria.fields() {
                    let values = candidate.time_values(&field.name)?;
                    if field_satisfied(&values, self.target.values(&field.name), interval, min_match) {
                        return Ok(Some(field.name.as_str()));
                    }
                }
                Ok(None)
            }
            MatchMode::DistinctFields => {
                let mut remaining = min_match;
                for field in self.criteria.fields() {
                    let values = candidate.time_values(&field.name)?;
                    if field_satisfied(&values, self.target.values(&field.name), interval, 1) {
                        remaining -= 1;
                        if remaining == 0 {
                            return Ok(Some(field.name.as_str()));
                        }
                    }
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::FieldBoost;
    use crate::interface::{CoincideError, GlobalOrdinal};
    use crate::record::RawDocument;
    use std::collections::HashMap;

    fn target(fields: &[(&str, &[i64])]) -> ResolvedTarget {
        let map: HashMap<String, Vec<i64>> = fields
            .iter()
            .map(|(name, values)| (name.to_string(), values.to_vec()))
            .collect();
        ResolvedTarget::new(GlobalOrdinal(0), map)
    }

    fn candidate(fields: &[(&str, &[&str])]) -> CandidateRecord {
        let raw = fields
            .iter()
            .fold(RawDocument::new(), |doc, (name, values)| doc.with(name, values.iter().copied()));
        CandidateRecord::new(1, GlobalOrdinal(1), raw)
    }

    fn criteria(fields: &[&str], min_match: i64, interval: i64) -> MatchCriteria {
        MatchCriteria::parse(fields, min_match, interval).unwrap()
    }

    #[test]
    fn test_scenario_first_value_exact() {
        // target k1=[1000], candidate k1=[1000, 5000], interval 100, min 1
        let t = target(&[("k1", &[1000])]);
        let c = criteria(&["k1"], 1, 100);
        let eval = MatchEvaluator::new(&c, &t);
        assert!(eval.matches(&candidate(&[("k1", &["1000", "5000"])])).unwrap());
    }

    #[test]
    fn test_scenario_two_values_in_window() {
        // target k1=[1000], candidate k1=[1000, 1050], interval 100, min 2
        let t = target(&[("k1", &[1000])]);
        let c = criteria(&["k1"], 2, 100);
        let eval = MatchEvaluator::new(&c, &t);
        assert!(eval.matches(&candidate(&[("k1", &["1000", "1050"])])).unwrap());
    }

    #[test]
    fn test_scenario_out_of_window() {
        let t = target(&[("k1", &[1000])]);
        let c = criteria(&["k1"], 1, 100);
        let eval = MatchEvaluator::new(&c, &t);
        assert!(!eval.matches(&candidate(&[("k1", &["2000"])])).unwrap());
    }

    #[test]
    fn test_scenario_first_field_short_circuits() {
        // k2 holds garbage; it must never be parsed once k1 confirms
        let t = target(&[("k1", &[1000]), ("k2", &[1000])]);
        let c = criteria(&["k1", "k2"], 1, 100);
        let eval = MatchEvaluator::new(&c, &t);
        let cand = candidate(&[("k1", &["1020"]), ("k2", &["not-a-number"])]);
        assert!(eval.matches(&cand).unwrap());
        assert_eq!(eval.matching_field(&cand).unwrap(), Some("k1"));
    }

    #[test]
    fn test_second_field_can_confirm() {
        let t = target(&[("k1", &[1000]), ("k2", &[9000])]);
        let c = criteria(&["k1", "k2"], 1, 100);
        let eval = MatchEvaluator::new(&c, &t);
        let cand = candidate(&[("k1", &["5000"]), ("k2", &["9100"])]);
        assert_eq!(eval.matching_field(&cand).unwrap(), Some("k2"));
    }

    #[test]
    fn test_inclusive_boundary() {
        let t = target(&[("k1", &[1000])]);
        let c = criteria(&["k1"], 1, 100);
        let eval = MatchEvaluator::new(&c, &t);
        assert!(eval.matches(&candidate(&[("k1", &["1100"])])).unwrap());
        assert!(eval.matches(&candidate(&[("k1", &["900"])])).unwrap());
        assert!(!eval.matches(&candidate(&[("k1", &["1101"])])).unwrap());
        assert!(!eval.matches(&candidate(&[("k1", &["899"])])).unwrap());
    }

    #[test]
    fn test_zero_interval_requires_equality() {
        let t = target(&[("k1", &[1000])]);
        let c = criteria(&["k1"], 1, 0);
        let eval = MatchEvaluator::new(&c, &t);
        assert!(eval.matches(&candidate(&[("k1", &["1000"])])).unwrap());
        assert!(!eval.matches(&candidate(&[("k1", &["1001"])])).unwrap());
    }

    #[test]
    fn test_missing_field_never_satisfies() {
        let t = target(&[("k1", &[1000])]);
        let c = criteria(&["k1"], 1, 100);
        let eval = MatchEvaluator::new(&c, &t);
        assert!(!eval.matches(&candidate(&[("other", &["1000"])])).unwrap());

        // Target lacking the field: nothing to be near
        let empty = target(&[]);
        let eval = MatchEvaluator::new(&c, &empty);
        assert!(!eval.matches(&candidate(&[("k1", &["1000"])])).unwrap());
    }

    #[test]
    fn test_min_match_counts_values_not_targets() {
        // Both candidate values sit near the same single target value
        let t = target(&[("k1", &[1000])]);
        let c = criteria(&["k1"], 3, 100);
        let eval = MatchEvaluator::new(&c, &t);
        assert!(!eval.matches(&candidate(&[("k1", &["1000", "1010"])])).unwrap());
        assert!(eval.matches(&candidate(&[("k1", &["1000", "1010", "990"])])).unwrap());
    }

    #[test]
    fn test_more_matches_than_needed_still_match() {
        let t = target(&[("k1", &[1000])]);
        let c = criteria(&["k1"], 1, 100);
        let eval = MatchEvaluator::new(&c, &t);
        assert!(eval.matches(&candidate(&[("k1", &["1000", "1001", "1002"])])).unwrap());
    }

    #[test]
    fn test_counts_do_not_combine_across_fields() {
        // One hit in k1 and one in k2 is not two hits in any single field
        let t = target(&[("k1", &[1000]), ("k2", &[1000])]);
        let c = criteria(&["k1", "k2"], 2, 100);
        let eval = MatchEvaluator::new(&c, &t);
        assert!(!eval.matches(&candidate(&[("k1", &["1000"]), ("k2", &["1000"])])).unwrap());
    }

    #[test]
    fn test_distinct_fields_mode() {
        let t = target(&[("k1", &[1000]), ("k2", &[1000])]);
        let fields = vec![FieldBoost::new("k1", 1.0).unwrap(), FieldBoost::new("k2", 1.0).unwrap()];
        let c = MatchCriteria::with_mode(fields, 2, 100, MatchMode::DistinctFields).unwrap();
        let eval = MatchEvaluator::new(&c, &t);
        assert!(eval.matches(&candidate(&[("k1", &["1000"]), ("k2", &["1050"])])).unwrap());
        assert!(!eval.matches(&candidate(&[("k1", &["1000", "1001"])])).unwrap());
    }

    #[test]
    fn test_malformed_candidate_value_is_error() {
        let t = target(&[("k1", &[1000])]);
        let c = criteria(&["k1"], 1, 100);
        let eval = MatchEvaluator::new(&c, &t);
        let err = eval.matches(&candidate(&[("k1", &["12:00"])])).unwrap_err();
        assert!(matches!(err, CoincideError::MalformedValue { ref field, .. } if field == "k1"));
    }

    #[test]
    fn test_extreme_values_do_not_overflow() {
        assert!(!field_satisfied(&[i64::MIN], &[i64::MAX], 100, 1));
        assert!(field_satisfied(&[i64::MAX], &[i64::MAX - 100], 100, 1));
    }

    #[test]
    fn test_deterministic() {
        let t = target(&[("k1", &[1000, 4000])]);
        let c = criteria(&["k1"], 2, 150);
        let eval = MatchEvaluator::new(&c, &t);
        let cand = candidate(&[("k1", &["3900", "1100", "7000"])]);
        let first = eval.matches(&cand).unwrap();
        for _ in 0..10 {
            assert_eq!(eval.matches(&cand).unwrap(), first);
        }
        assert!(first);
    }
}
