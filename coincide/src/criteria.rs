//! Match criteria: which fields to compare, how many value matches are
//! required and how wide the time window is.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::interface::{CoincideError, CoincideResult};

/// Default tolerance: 3 minutes in milliseconds.
pub const DEFAULT_TIME_INTERVAL_MS: i64 = 180_000;

/// Advisory per-field weight. Matching never reads it.
pub const DEFAULT_FIELD_BOOST: f32 = 1.0;

/// A configured field name with its (advisory) boost, written `name^weight`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBoost {
    pub name: String,
    pub boost: f32,
}

impl FieldBoost {
    pub fn new(name: impl Into<String>, boost: f32) -> CoincideResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoincideError::config("field name is null or empty"));
        }
        if !boost.is_finite() || boost < 0.0 {
            return Err(CoincideError::config(format!(
                "invalid boost [{boost}] for field [{name}]"
            )));
        }
        Ok(Self { name, boost })
    }
}

impl FromStr for FieldBoost {
    type Err = CoincideError;

    fn from_str(input: &str) -> CoincideResult<Self> {
        match input.rsplit_once('^') {
            Some((name, weight)) => {
                let boost = weight.trim().parse::<f32>().map_err(|_| {
                    CoincideError::config(format!("invalid boost [{weight}] in field [{input}]"))
                })?;
                FieldBoost::new(name.trim(), boost)
            }
            None => FieldBoost::new(input.trim(), DEFAULT_FIELD_BOOST),
        }
    }
}

impl fmt::Display for FieldBoost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.boost == DEFAULT_FIELD_BOOST {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}^{}", self.name, self.boost)
        }
    }
}

/// How `min_match` is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// `min_match` candidate values of one single field must each fall inside
    /// the window of some target value of that field. Fields are tried in
    /// configured order and the first one to reach the threshold wins.
    #[default]
    PerField,
    /// `min_match` distinct fields must each have at least one candidate value
    /// inside the window of a target value.
    DistinctFields,
}

/// Validated matching parameters, immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCriteria {
    fields: Vec<FieldBoost>,
    min_match: u32,
    time_interval: i64,
    mode: MatchMode,
}

impl MatchCriteria {
    /// Build criteria with the default (per-field) mode.
    pub fn new(fields: Vec<FieldBoost>, min_match: i64, time_interval: i64) -> CoincideResult<Self> {
        Self::with_mode(fields, min_match, time_interval, MatchMode::PerField)
    }

    pub fn with_mode(
        fields: Vec<FieldBoost>,
        min_match: i64,
        time_interval: i64,
        mode: MatchMode,
    ) -> CoincideResult<Self> {
        if fields.is_empty() {
            return Err(CoincideError::config("at least one field is required"));
        }
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(CoincideError::config(format!(
                    "field [{}] is listed more than once",
                    field.name
                )));
            }
        }
        if min_match < 1 {
            return Err(CoincideError::config(format!(
                "[min_match] must be at least 1, got [{min_match}]"
            )));
        }
        let min_match = u32::try_from(min_match).map_err(|_| {
            CoincideError::config(format!("[min_match] out of range: [{min_match}]"))
        })?;
        if mode == MatchMode::DistinctFields && min_match as usize > fields.len() {
            return Err(CoincideError::config(format!(
                "[min_match] [{min_match}] exceeds the number of fields [{}]",
                fields.len()
            )));
        }
        if time_interval < 0 {
            return Err(CoincideError::config(format!(
                "[time_interval] must not be negative, got [{time_interval}]"
            )));
        }
        Ok(Self {
            fields,
            min_match,
            time_interval,
            mode,
        })
    }

    /// Parse `name` / `name^weight` specs and build per-field criteria.
    pub fn parse<S: AsRef<str>>(fields: &[S], min_match: i64, time_interval: i64) -> CoincideResult<Self> {
        let fields = fields
            .iter()
            .map(|f| f.as_ref().parse())
            .collect::<CoincideResult<Vec<FieldBoost>>>()?;
        Self::new(fields, min_match, time_interval)
    }

    pub fn fields(&self) -> &[FieldBoost] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn min_match(&self) -> u32 {
        self.min_match
    }

    /// Window width in milliseconds, inclusive on both sides.
    pub fn time_interval(&self) -> i64 {
        self.time_interval
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }
}
