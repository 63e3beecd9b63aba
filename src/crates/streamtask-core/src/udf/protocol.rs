//! The wire protocol a UDF peer speaks (§4.8): a tagged, bincode-encoded
//! enum covering the handshake (`Info`/`Init`/`Restore`), the keepalive,
//! and the data path (`Begin`/`Point`/`End`). Bodies have no generic value
//! type, so point fields are split into typed string/float/int/bool maps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An option value passed to a UDF at `Init` time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptionValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

/// The declared edge type a UDF wants on input or provides on output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    Stream,
    Batch,
}

/// The split, typed representation of a point's fields on the wire — the
/// wire protocol has no generic value type, so each kind gets its own map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireFields {
    pub ints: BTreeMap<String, i64>,
    pub floats: BTreeMap<String, f64>,
    pub strings: BTreeMap<String, String>,
    pub bools: BTreeMap<String, bool>,
}

impl WireFields {
    pub fn from_fields(fields: &BTreeMap<String, crate::model::point::FieldValue>) -> Self {
        use crate::model::point::FieldValue;
        let mut w = WireFields::default();
        for (k, v) in fields {
            match v {
                FieldValue::Int(i) => { w.ints.insert(k.clone(), *i); }
                FieldValue::Float(f) => { w.floats.insert(k.clone(), *f); }
                FieldValue::Str(s) => { w.strings.insert(k.clone(), s.clone()); }
                FieldValue::Bool(b) => { w.bools.insert(k.clone(), *b); }
                // No null slot on the wire; a null join contribution
                // just doesn't reach the peer as a field.
                FieldValue::Null => {}
            };
        }
        w
    }

    pub fn into_fields(self) -> BTreeMap<String, crate::model::point::FieldValue> {
        use crate::model::point::FieldValue;
        let mut fields = BTreeMap::new();
        for (k, v) in self.ints {
            fields.insert(k, FieldValue::Int(v));
        }
        for (k, v) in self.floats {
            fields.insert(k, FieldValue::Float(v));
        }
        for (k, v) in self.strings {
            fields.insert(k, FieldValue::Str(v));
        }
        for (k, v) in self.bools {
            fields.insert(k, FieldValue::Bool(v));
        }
        fields
    }
}

/// One wire point, carrying event time and tags alongside its split
/// fields. Shared by the streaming `Point` message and batch `Begin`/
/// `Point`/`End` framing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePoint {
    pub time_unix_nanos: i64,
    pub tags: BTreeMap<String, String>,
    pub fields: WireFields,
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBatchHeader {
    pub name: String,
    pub group: String,
    pub tags: BTreeMap<String, String>,
    pub t_max_unix_nanos: i64,
}

/// A message sent from the engine to a UDF peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Ask the peer to describe its declared edges and options.
    Info,
    /// Start processing with the given bound options.
    Init { options: BTreeMap<String, OptionValue> },
    /// Keep the connection alive; any message resets the peer's watchdog.
    Keepalive { time_unix_nanos: i64 },
    /// Ask the peer to serialize its internal state.
    Snapshot,
    /// Hand the peer a previously captured snapshot to restore from.
    Restore { snapshot: Vec<u8> },
    /// A streaming point.
    Point(WirePoint),
    /// The start of a batch window.
    Begin(WireBatchHeader),
    /// A point inside the most recently begun batch.
    BatchPoint(WirePoint),
    /// The end of the most recently begun batch.
    End(WireBatchHeader),
}

/// A message sent from a UDF peer back to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Info { wants: EdgeKind, provides: EdgeKind, options: Vec<String> },
    Init { success: bool, error: Option<String> },
    Keepalive { time_unix_nanos: i64 },
    Snapshot { snapshot: Vec<u8> },
    Restore { success: bool, error: Option<String> },
    Point(WirePoint),
    Begin(WireBatchHeader),
    BatchPoint(WirePoint),
    End(WireBatchHeader),
    /// The peer reports a non-fatal processing error; the node logs it and
    /// continues.
    Error { message: String },
}
