//! System-level configuration.
//!
//! Plain serde structs so the transport layer can hand them over as JSON.
//! Loading them from the environment or a file is the embedding process's
//! job.

use serde::{Deserialize, Serialize};

use crate::ground_truth::ClusterDistribution;
use crate::relay::RelayCostModel;
use crate::{Error, Result};

pub const MAX_POINTS: u32 = 10_000;

/// Fixed for the lifetime of a `TestSystem`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub total_points: u32,
    pub max_relay_operations: u64,
    pub relay_cost: RelayCostModel,
    pub distribution: ClusterDistribution,
    /// Seed for simulated wiring; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            total_points: 100,
            max_relay_operations: 100_000,
            relay_cost: RelayCostModel::default(),
            distribution: ClusterDistribution::default(),
            seed: None,
        }
    }
}

impl SystemConfig {
    pub fn with_points(total_points: u32) -> Self {
        Self { total_points, ..Self::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if !(2..=MAX_POINTS).contains(&self.total_points) {
            return Err(Error::InvalidConfiguration(format!(
                "total_points must be in 2..={MAX_POINTS}, got {}",
                self.total_points
            )));
        }
        if self.max_relay_operations == 0 {
            return Err(Error::InvalidConfiguration("max_relay_operations must be positive".into()));
        }
        self.distribution.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        SystemConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(SystemConfig::with_points(1).validate().is_err());
        assert!(SystemConfig::with_points(MAX_POINTS + 1).validate().is_err());
        let cfg = SystemConfig { max_relay_operations: 0, ..SystemConfig::default() };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_partial_json() {
        let cfg: SystemConfig =
            serde_json::from_str(r#"{"total_points": 500, "relay_cost": "shared_read_path"}"#).unwrap();
        assert_eq!(cfg.total_points, 500);
        assert_eq!(cfg.relay_cost, RelayCostModel::SharedReadPath);
        assert_eq!(cfg.max_relay_operations, 100_000);
    }
}
