//! Test points on the relay matrix.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Point identifier in `[0, N)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PointId(pub u32);

impl PointId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Reject ids outside `[0, total)`.
    pub fn check(self, total: u32) -> Result<Self> {
        if self.0 < total {
            Ok(self)
        } else {
            Err(Error::InvalidPoint { point: self.0, total })
        }
    }
}

impl From<u32> for PointId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for PointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of one point's relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    #[default]
    Off,
    On,
}

/// Snapshot of a point as seen through `QueryPointState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointState {
    pub id: PointId,
    pub relay: RelayState,
    /// Representative of the discovered cluster, if the point has one.
    pub cluster: Option<PointId>,
}
