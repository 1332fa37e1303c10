//! JSON export: one document with the system status, the real and the
//! discovered clusters, the metrics and the full test history.
//!
//! ```text
//! TestSystem::export_json() → ExportDocument (one read snapshot)
//!   → serde_json, pretty-printed → any io::Write
//! ```
//!
//! The document is for offline analysis. It is not read back.

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cluster::Cluster;
use crate::config::SystemConfig;
use crate::metrics::Metrics;
use crate::model::{PointId, TestRecord};
use crate::relations::RelationSummary;
use crate::relay::RelayStats;
use crate::Result;

/// Everything exported, borrowed from one consistent snapshot.
#[derive(Debug, Serialize)]
pub struct ExportDocument<'a> {
    pub exported_at: DateTime<Utc>,
    pub config: &'a SystemConfig,
    pub relay: RelayStats,
    pub relations: RelationSummary,
    pub metrics: Metrics,
    /// Real clusters of two or more points; absent on physical hardware.
    pub ground_truth_clusters: Option<Vec<&'a [PointId]>>,
    pub discovered_clusters: Vec<Cluster>,
    pub history: &'a [TestRecord],
}

/// Write `doc` as pretty-printed JSON followed by a newline.
pub fn write_json(doc: &ExportDocument<'_>, writer: &mut dyn Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, doc)?;
    writeln!(writer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::{Reading, TargetOutcome, TestId};
    use crate::relay::RelayCostModel;

    #[test]
    fn test_document_shape() {
        let config = SystemConfig::with_points(4);
        let real = [PointId(0), PointId(1)];
        let history = [TestRecord {
            id: TestId(1),
            timestamp: Utc::now(),
            source: PointId(0),
            requested: vec![PointId(1)],
            targets: vec![PointId(1)],
            outcomes: vec![TargetOutcome { target: PointId(1), reading: Reading::Conducting }],
            duration: Duration::from_millis(3),
            relay_operations: 2,
            power_on_operations: 1,
        }];
        let doc = ExportDocument {
            exported_at: Utc::now(),
            config: &config,
            relay: RelayStats {
                total_operations: 2,
                power_on_count: 1,
                current_source: Some(PointId(0)),
                active_points: 2,
                ceiling: 10,
                remaining: 8,
                tests_run: 1,
            },
            relations: RelationSummary { total_points: 4, conducting_pairs: 1, non_conducting_pairs: 0, unknown_pairs: 5 },
            metrics: Metrics {
                detection_rate: 1.0 / 6.0,
                accuracy_rate: Some(100.0),
                coverage: 1.0 / 6.0,
                relay_efficiency: 0.5,
                relay_operations: 2,
                tests_run: 1,
                conducting_pairs: 1,
                non_conducting_pairs: 0,
                unknown_pairs: 5,
                clusters: 1,
                clustered_points: 2,
                inconsistencies: 0,
            },
            ground_truth_clusters: Some(vec![&real[..]]),
            discovered_clusters: vec![Cluster { representative: PointId(0), members: vec![PointId(0), PointId(1)] }],
            history: &history,
        };

        let mut out = Vec::new();
        write_json(&doc, &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(value["config"]["relay_cost"], serde_json::json!(RelayCostModel::PerTarget));
        assert_eq!(value["ground_truth_clusters"], serde_json::json!([[0, 1]]));
        assert_eq!(value["discovered_clusters"][0]["members"], serde_json::json!([0, 1]));
        assert_eq!(value["history"][0]["outcomes"][0]["reading"], "conducting");
        assert_eq!(value["metrics"]["accuracy_rate"], 100.0);
    }
}
