//! The value types carried through the engine: [`point`], [`batch`],
//! [`group`], and the edge [`message`] sum type.

pub mod batch;
pub mod group;
pub mod message;
pub mod point;

pub use batch::{Batch, BatchHeader, BatchPoint};
pub use group::{Dimensions, GroupId};
pub use message::Message;
pub use point::{round_time, truncate_time, FieldValue, Point};
