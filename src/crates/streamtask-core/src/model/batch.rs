//! `Batch` and `BatchPoint` (§3).

use super::group::{Dimensions, GroupId};
use super::point::FieldValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single point inside a batch: no measurement/database/retention
/// policy of its own, those live on the enclosing [`Batch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPoint {
    pub time: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
}

/// The header fields shared between `BeginBatch`/`EndBatch` edge messages
/// and a fully materialized [`Batch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchHeader {
    pub name: String,
    pub group: GroupId,
    pub tags: BTreeMap<String, String>,
    pub dimensions: Dimensions,
    /// Upper bound of the query window this batch covers.
    pub t_max: DateTime<Utc>,
    pub by_name: bool,
}

/// A batch query result: a name, a group, and an ordered sequence of
/// points. An empty `points` vector is a legal message and downstream
/// operators must still run their "empty-window" behavior over it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub header: BatchHeader,
    pub points: Vec<BatchPoint>,
}

impl Batch {
    pub fn new(header: BatchHeader, points: Vec<BatchPoint>) -> Self {
        Self { header, points }
    }

    pub fn is_empty_window(&self) -> bool {
        self.points.is_empty()
    }
}
