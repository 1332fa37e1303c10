//! Read-only metrics derived from the store, the partition and the relay counters.

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterEngine;
use crate::ground_truth::GroundTruth;
use crate::model::Relation;
use crate::relations::RelationStore;
use crate::relay::RelayController;

/// Discovery metrics at one committed point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Resolved cells / all off-diagonal pairs.
    pub detection_rate: f64,
    /// Exact-match cluster accuracy in percent; `None` without ground truth.
    pub accuracy_rate: Option<f64>,
    /// Pairs read at least once / all off-diagonal pairs.
    pub coverage: f64,
    /// Resolved cells per relay operation.
    pub relay_efficiency: f64,
    pub relay_operations: u64,
    pub tests_run: usize,
    pub conducting_pairs: u64,
    pub non_conducting_pairs: u64,
    pub unknown_pairs: u64,
    pub clusters: usize,
    pub clustered_points: usize,
    pub inconsistencies: u64,
}

impl Metrics {
    /// Both targets met. Without ground truth only detection counts.
    pub fn meets(&self, detection_target: f64, accuracy_target: f64) -> bool {
        self.detection_rate >= detection_target
            && self.accuracy_rate.is_none_or(|acc| acc >= accuracy_target)
    }
}

pub fn compute(
    relations: &RelationStore,
    clusters: &ClusterEngine,
    relay: &RelayController,
    truth: Option<&GroundTruth>,
) -> Metrics {
    let summary = relations.summary();
    let ops = relay.used();
    Metrics {
        detection_rate: relations.detection_rate(),
        accuracy_rate: truth.map(|t| clusters.compare_to_ground_truth(t).accuracy_rate),
        coverage: relations.coverage(),
        relay_efficiency: if ops == 0 { 0.0 } else { relations.resolved_count() as f64 / ops as f64 },
        relay_operations: ops,
        tests_run: relay.history().len(),
        conducting_pairs: summary.conducting_pairs,
        non_conducting_pairs: summary.non_conducting_pairs,
        unknown_pairs: summary.unknown_pairs,
        clusters: clusters.cluster_count(),
        clustered_points: clusters.clustered_points(),
        inconsistencies: relations.inconsistencies(),
    }
}

/// Cell-level comparison of discovered knowledge against the real wiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairComparison {
    pub resolved: u64,
    pub matched_conducting: u64,
    pub matched_non_conducting: u64,
    /// Discovered Conducting, really NonConducting.
    pub false_positive: u64,
    /// Discovered NonConducting, really Conducting.
    pub false_negative: u64,
    pub real_conducting_pairs: u64,
    /// Correct resolved cells / resolved cells, in percent.
    pub accuracy_percentage: f64,
}

pub fn compare_pairs(relations: &RelationStore, truth: &GroundTruth) -> PairComparison {
    let mut out = PairComparison {
        resolved: relations.resolved_count(),
        matched_conducting: 0,
        matched_non_conducting: 0,
        false_positive: 0,
        false_negative: 0,
        real_conducting_pairs: truth.conducting_pairs(),
        accuracy_percentage: 0.0,
    };
    for (key, found) in relations.cells() {
        match (found, truth.conducts(key.lo(), key.hi())) {
            (Relation::Conducting, true) => out.matched_conducting += 1,
            (Relation::NonConducting, false) => out.matched_non_conducting += 1,
            (Relation::Conducting, false) => out.false_positive += 1,
            (Relation::NonConducting, true) => out.false_negative += 1,
        }
    }
    if out.resolved > 0 {
        let correct = out.matched_conducting + out.matched_non_conducting;
        out.accuracy_percentage = correct as f64 / out.resolved as f64 * 100.0;
    }
    out
}
