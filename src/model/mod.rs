//! # Connectivity Model
//!
//! Plain DTOs shared by every component: point ids, relation cells,
//! probe readings and the immutable test log.
//!
//! Design rule: no locks, no I/O, no async here. This module is pure data.

pub mod point;
pub mod relation;
pub mod record;

pub use point::{PointId, PointState, RelayState};
pub use relation::{PairKey, Reading, Relation, RelationState};
pub use record::{TargetOutcome, TestId, TestRecord};
