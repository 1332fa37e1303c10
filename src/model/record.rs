//! Append-only test log entries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PointId, Reading};

/// Sequential test identifier, unique within one system lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TestId(pub u64);

impl std::fmt::Display for TestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "test-{}", self.0)
    }
}

/// Reading for one target of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub target: PointId,
    pub reading: Reading,
}

/// One executed batch. Never mutated after it is committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub id: TestId,
    pub timestamp: DateTime<Utc>,
    pub source: PointId,
    /// Targets exactly as requested, duplicates and the source included.
    pub requested: Vec<PointId>,
    /// Targets actually read: `requested` sorted and deduplicated, without
    /// the source. `outcomes` follows this order.
    pub targets: Vec<PointId>,
    pub outcomes: Vec<TargetOutcome>,
    pub duration: Duration,
    pub relay_operations: u64,
    /// Source activations in this batch (0 when the source was already on).
    pub power_on_operations: u64,
}

impl TestRecord {
    pub fn conducting_targets(&self) -> impl Iterator<Item = PointId> + '_ {
        self.outcomes
            .iter()
            .filter(|o| o.reading == Reading::Conducting)
            .map(|o| o.target)
    }

    pub fn ambiguous_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.reading == Reading::Ambiguous).count()
    }
}
