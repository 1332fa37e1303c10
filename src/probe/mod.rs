//! # Continuity Probe
//!
//! The boundary to the voltage-reading hardware. A probe energizes one
//! source, reads a set of targets and reports one [`Reading`] per target.
//!
//! ## Implementations
//!
//! | Probe | Module | Description |
//! |-------|--------|-------------|
//! | `SimulatedProbe` | `simulated` | Reads a hidden [`GroundTruth`]; reference implementation |
//!
//! Real drivers live outside this crate and implement the same trait.

pub mod simulated;

use std::sync::Arc;

use async_trait::async_trait;

use crate::ground_truth::{ClusterDistribution, GroundTruth};
use crate::model::{PointId, Reading};
use crate::Result;

pub use simulated::SimulatedProbe;

/// The hardware contract.
#[async_trait]
pub trait ContinuityProbe: Send + Sync + 'static {
    /// Energize `source` and read every target, in order.
    ///
    /// An `Err` or a result of the wrong length is treated as an ambiguous
    /// reading for the whole batch.
    async fn read(&self, source: PointId, targets: &[PointId]) -> Result<Vec<Reading>>;

    /// The real wiring, when the probe knows it (simulation only).
    fn ground_truth(&self) -> Option<Arc<GroundTruth>> {
        None
    }

    /// Draw new wiring. Physical hardware cannot and returns `None`.
    async fn rewire(&self, _distribution: Option<ClusterDistribution>) -> Result<Option<Arc<GroundTruth>>> {
        Ok(None)
    }
}

/// Normalize a probe result to exactly `expected` readings.
pub fn align_readings(source: PointId, expected: usize, result: Result<Vec<Reading>>) -> Vec<Reading> {
    match result {
        Ok(readings) if readings.len() == expected => readings,
        Ok(readings) => {
            tracing::warn!(
                source = %source,
                expected,
                got = readings.len(),
                "probe returned misaligned readings; batch left unknown"
            );
            vec![Reading::Ambiguous; expected]
        }
        Err(e) => {
            tracing::warn!(source = %source, error = %e, "probe error; batch left unknown");
            vec![Reading::Ambiguous; expected]
        }
    }
}
