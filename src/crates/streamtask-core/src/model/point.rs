//! `Point` and `FieldValue` (§3).

use super::group::{Dimensions, GroupId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A field's value. The wire and storage model carries four concrete
/// kinds plus `Null`, a present-but-valueless contribution (the shape a
/// `Join` fill produces for a parent that didn't report — see
/// [`crate::ops::join`]); the evaluator adds a sixth, `Time`, for literal
/// comparison against event time (see [`crate::eval`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Str(_) => "string",
            FieldValue::Bool(_) => "bool",
            FieldValue::Null => "null",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

/// An immutable-by-convention stream message: a single measurement at a
/// point in time, carrying tags, fields, and the dimensions that define
/// its group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub database: String,
    pub retention_policy: String,
    pub measurement: String,
    /// Event time, nanosecond resolution, UTC.
    pub time: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub dimensions: Dimensions,
    group: GroupId,
}

impl Point {
    pub fn new(
        database: impl Into<String>,
        retention_policy: impl Into<String>,
        measurement: impl Into<String>,
        time: DateTime<Utc>,
        tags: BTreeMap<String, String>,
        fields: BTreeMap<String, FieldValue>,
        dimensions: Dimensions,
    ) -> Self {
        let measurement = measurement.into();
        let group = GroupId::derive(&measurement, &dimensions, &tags);
        Self {
            database: database.into(),
            retention_policy: retention_policy.into(),
            measurement,
            time,
            tags,
            fields,
            dimensions,
            group,
        }
    }

    /// The point's group, derived from its current tags and dimensions.
    pub fn group(&self) -> &GroupId {
        &self.group
    }

    /// Recompute the cached group after tags or dimensions have changed.
    /// Operators that rewrite dimensions (e.g. `StreamFrom`, `Join`'s
    /// specific-into-match copy) must call this before forwarding.
    pub fn recompute_group(&mut self) {
        self.group = GroupId::derive(&self.measurement, &self.dimensions, &self.tags);
    }

    pub fn with_dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions = dimensions;
        self.recompute_group();
        self
    }

    /// Round `time` to the nearest multiple of `tolerance`, as used by
    /// Combine's bucketing and Join's clock reconciliation (§4.4, §4.5).
    pub fn rounded_time(&self, tolerance: chrono::Duration) -> DateTime<Utc> {
        round_time(self.time, tolerance)
    }
}

/// Round an instant to the nearest multiple of `tolerance` (half rounds
/// up), matching `time.Round` semantics used throughout §4.4/§4.5.
pub fn round_time(t: DateTime<Utc>, tolerance: chrono::Duration) -> DateTime<Utc> {
    let tol_ns = tolerance.num_nanoseconds().unwrap_or(1).max(1);
    let t_ns = t.timestamp_nanos_opt().unwrap_or(0);
    let half = tol_ns / 2;
    let rounded = ((t_ns + half).div_euclid(tol_ns)) * tol_ns;
    DateTime::<Utc>::from_timestamp(rounded / 1_000_000_000, (rounded % 1_000_000_000) as u32)
        .unwrap_or(t)
}

/// Truncate an instant down to the nearest multiple of `duration`, used by
/// `StreamFrom`'s time truncation and `Sample`'s duration mode.
pub fn truncate_time(t: DateTime<Utc>, duration: chrono::Duration) -> DateTime<Utc> {
    let dur_ns = duration.num_nanoseconds().unwrap_or(1).max(1);
    let t_ns = t.timestamp_nanos_opt().unwrap_or(0);
    let truncated = t_ns.div_euclid(dur_ns) * dur_ns;
    DateTime::<Utc>::from_timestamp(truncated / 1_000_000_000, (truncated % 1_000_000_000) as u32)
        .unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rounding_snaps_to_nearest_tolerance_multiple() {
        let t = Utc.timestamp_opt(100, 600_000_000).unwrap();
        let rounded = round_time(t, chrono::Duration::seconds(1));
        assert_eq!(rounded, Utc.timestamp_opt(101, 0).unwrap());
    }

    #[test]
    fn truncation_floors_to_duration() {
        let t = Utc.timestamp_opt(100, 600_000_000).unwrap();
        let truncated = truncate_time(t, chrono::Duration::seconds(1));
        assert_eq!(truncated, Utc.timestamp_opt(100, 0).unwrap());
    }

    #[test]
    fn group_recomputes_after_dimension_change() {
        let t = Utc::now();
        let mut p = Point::new(
            "db", "autogen", "cpu", t,
            BTreeMap::from([("host".to_string(), "A".to_string())]),
            BTreeMap::new(),
            Dimensions::new(vec!["host".into()], false),
        );
        let g1 = p.group().clone();
        p.dimensions = Dimensions::none();
        p.recompute_group();
        assert_ne!(g1, *p.group());
        assert!(p.group().is_nil());
    }
}
