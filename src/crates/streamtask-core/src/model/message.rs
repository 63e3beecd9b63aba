//! The edge message sum type (§3, §9).
//!
//! The legacy system this engine replaces carried both framed
//! `BeginBatch`/`BatchPoint`/`EndBatch` messages and a `BufferedBatch`
//! convenience message on the same edges. Per §9's design note, edges here
//! only ever carry the framed form; `BufferedBatch` is still a variant of
//! this enum (it is part of the model §3 names), but it is produced
//! *inside* an operator that has already buffered a batch for its own
//! purposes and wants to re-emit it downstream as a single unit (e.g.
//! Join's per-timestamp batch co-iteration result) rather than re-framing
//! it point by point.

use super::batch::{BatchHeader, BatchPoint};
use super::group::GroupId;
use super::point::Point;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything that can travel on an [`crate::edge::Edge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Point(Point),
    BeginBatch(BatchHeader),
    BatchPoint(BatchPoint),
    /// Closes the most recent `BeginBatch` on this edge. Carries the same
    /// header so a consumer can validate which batch is closing without
    /// having buffered the begin.
    EndBatch(BatchHeader),
    /// A fully materialized batch, re-emitted as a single unit by an
    /// operator that already buffered it internally (see module docs).
    BufferedBatch(super::batch::Batch),
    /// A time watermark: no event at or before this time will arrive on
    /// this edge again.
    Barrier(DateTime<Utc>),
    /// Forget any state held for this group. Stateful operators MUST
    /// purge their group-keyed maps on receipt to bound memory (§9).
    DeleteGroup(GroupId),
    /// End of stream.
    Done,
}

impl Message {
    pub fn is_done(&self) -> bool {
        matches!(self, Message::Done)
    }

    pub fn as_point(&self) -> Option<&Point> {
        match self {
            Message::Point(p) => Some(p),
            _ => None,
        }
    }
}
