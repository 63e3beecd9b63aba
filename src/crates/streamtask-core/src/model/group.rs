//! `GroupId` — the identity of a logical sub-stream (§3).
//!
//! A `GroupId` is a canonical string formed by encoding
//! `(measurement?, dimension-name, tag-value)` pairs in the dimensions'
//! declared order. Because the encoding walks the declared dimension list
//! rather than a point's tag map directly, two points with the same tag
//! values produce the same `GroupId` regardless of the order their tags
//! happened to be inserted in.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The tag names that define a group, plus whether the measurement name
/// is itself part of the group identity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    /// Declared order matters for canonical encoding, not for equality.
    pub by_name: Vec<String>,
    pub measurement_as_dim: bool,
}

impl Dimensions {
    pub fn new(by_name: Vec<String>, measurement_as_dim: bool) -> Self {
        Self { by_name, measurement_as_dim }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Canonical identity of a sub-stream. `NilGroup` is the distinguished
/// group used when no grouping is in effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(String);

impl GroupId {
    /// The distinguished "no grouping" group.
    pub fn nil() -> Self {
        GroupId(String::new())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a canonical `GroupId` from a measurement name, a set of
    /// declared dimensions, and a point's tag map. Stable regardless of
    /// the tag map's insertion/iteration order.
    pub fn derive(measurement: &str, dims: &Dimensions, tags: &BTreeMap<String, String>) -> Self {
        if dims.by_name.is_empty() && !dims.measurement_as_dim {
            return Self::nil();
        }
        let mut encoded = String::new();
        if dims.measurement_as_dim {
            encoded.push_str(measurement);
        }
        for name in &dims.by_name {
            encoded.push('\u{0}');
            encoded.push_str(name);
            encoded.push('=');
            if let Some(value) = tags.get(name) {
                encoded.push_str(value);
            }
        }
        GroupId(encoded)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "<nil>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
