//! # Information Gain Scorer
//!
//! Pure priority function over `(source, target)` candidates, computed
//! from discovered knowledge only.
//!
//! ```text
//! gain(source, target) = weight(prediction) × source_priority(source)
//! ```
//!
//! | Prediction | Weight | When |
//! |---|---|---|
//! | Conducting | 2.0 | a cluster-mate of `source` conducts with `target` |
//! | NonConducting | 1.5 | cluster evidence against, or most of `target`'s resolved cells are NonConducting |
//! | NoPrediction | 1.0 | `target` has no resolved cell yet |
//!
//! Targets inside `source`'s own cluster are never candidates: their
//! relation already follows from the partition.

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterEngine;
use crate::model::{PointId, RelationState};
use crate::relations::RelationStore;
use crate::Result;

pub const WEIGHT_CONDUCTING: f64 = 2.0;
pub const WEIGHT_NON_CONDUCTING: f64 = 1.5;
pub const WEIGHT_NO_PREDICTION: f64 = 1.0;

pub const PRIORITY_UNCLUSTERED: f64 = 1.0;
pub const PRIORITY_CLUSTERED: f64 = 0.5;

/// Heuristic guess for an Unknown cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Prediction {
    Conducting,
    NonConducting,
    NoPrediction,
}

impl Prediction {
    pub fn weight(self) -> f64 {
        match self {
            Prediction::Conducting => WEIGHT_CONDUCTING,
            Prediction::NonConducting => WEIGHT_NON_CONDUCTING,
            Prediction::NoPrediction => WEIGHT_NO_PREDICTION,
        }
    }
}

/// A ranked target for one source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub target: PointId,
    pub gain: f64,
    pub prediction: Prediction,
}

pub struct InformationGainScorer<'a> {
    relations: &'a RelationStore,
    clusters: &'a ClusterEngine,
}

impl<'a> InformationGainScorer<'a> {
    pub fn new(relations: &'a RelationStore, clusters: &'a ClusterEngine) -> Self {
        Self { relations, clusters }
    }

    /// Unclustered sources explore undiscovered structure and rank higher.
    pub fn source_priority(&self, source: PointId) -> f64 {
        if self.clusters.is_clustered(source) { PRIORITY_CLUSTERED } else { PRIORITY_UNCLUSTERED }
    }

    fn cluster_evidence(&self, anchor: PointId, other: PointId, state: RelationState) -> bool {
        self.clusters
            .members_of(anchor)
            .filter(|&m| m != anchor && m != other)
            .any(|m| self.relations.get(m, other).is_ok_and(|s| s == state))
    }

    pub fn predict(&self, source: PointId, target: PointId) -> Prediction {
        if self.cluster_evidence(source, target, RelationState::Conducting) {
            return Prediction::Conducting;
        }
        if self.cluster_evidence(source, target, RelationState::NonConducting)
            || self.cluster_evidence(target, source, RelationState::NonConducting)
        {
            return Prediction::NonConducting;
        }
        match self.relations.degree(target) {
            Ok(d) if d.resolved > 0 && d.non_conducting() * 2 > d.resolved => Prediction::NonConducting,
            _ => Prediction::NoPrediction,
        }
    }

    /// Gain of testing `(source, target)`; `None` when the cell is already known.
    pub fn gain(&self, source: PointId, target: PointId) -> Result<Option<f64>> {
        if self.relations.get(source, target)?.is_known() {
            return Ok(None);
        }
        Ok(Some(self.predict(source, target).weight() * self.source_priority(source)))
    }

    fn candidates(&self, source: PointId) -> Result<impl Iterator<Item = PointId> + '_> {
        Ok(self
            .relations
            .unresolved_for(source)?
            .filter(move |&t| !self.clusters.same_cluster(source, t)))
    }

    /// Whether `source` has at least one candidate, without ranking.
    pub fn has_candidates(&self, source: PointId) -> Result<bool> {
        Ok(self.candidates(source)?.next().is_some())
    }

    /// Candidates for `source` by descending gain, ties by ascending id.
    pub fn rank(&self, source: PointId) -> Result<Vec<Candidate>> {
        let priority = self.source_priority(source);
        let mut ranked: Vec<Candidate> = self
            .candidates(source)?
            .map(|target| {
                let prediction = self.predict(source, target);
                Candidate { target, gain: prediction.weight() * priority, prediction }
            })
            .collect();
        ranked.sort_by(|a, b| b.gain.total_cmp(&a.gain).then_with(|| a.target.cmp(&b.target)));
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Relation;

    fn p(i: u32) -> PointId {
        PointId(i)
    }

    fn confirm(store: &mut RelationStore, clusters: &mut ClusterEngine, a: u32, b: u32, rel: Relation) {
        store.apply(p(a), p(b), rel).unwrap();
        if rel == Relation::Conducting {
            clusters.on_conducting(p(a), p(b)).unwrap();
        }
    }

    #[test]
    fn test_fresh_system_has_no_predictions() {
        let store = RelationStore::new(5);
        let clusters = ClusterEngine::new(5);
        let scorer = InformationGainScorer::new(&store, &clusters);

        let ranked = scorer.rank(p(2)).unwrap();
        let targets: Vec<_> = ranked.iter().map(|c| c.target).collect();
        assert_eq!(targets, vec![p(0), p(1), p(3), p(4)]);
        assert!(ranked.iter().all(|c| c.prediction == Prediction::NoPrediction && c.gain == 1.0));
    }

    #[test]
    fn test_cluster_mate_evidence_predicts_conducting() {
        let mut store = RelationStore::new(6);
        let mut clusters = ClusterEngine::new(6);
        confirm(&mut store, &mut clusters, 0, 1, Relation::Conducting);
        confirm(&mut store, &mut clusters, 1, 2, Relation::Conducting);

        let scorer = InformationGainScorer::new(&store, &clusters);
        assert_eq!(scorer.predict(p(0), p(2)), Prediction::Conducting);
        assert_eq!(scorer.gain(p(0), p(2)).unwrap(), Some(WEIGHT_CONDUCTING * PRIORITY_CLUSTERED));
        assert_eq!(scorer.gain(p(0), p(1)).unwrap(), None);
    }

    #[test]
    fn test_cluster_mate_evidence_predicts_non_conducting() {
        let mut store = RelationStore::new(6);
        let mut clusters = ClusterEngine::new(6);
        confirm(&mut store, &mut clusters, 0, 1, Relation::Conducting);
        confirm(&mut store, &mut clusters, 1, 4, Relation::NonConducting);

        let scorer = InformationGainScorer::new(&store, &clusters);
        assert_eq!(scorer.predict(p(0), p(4)), Prediction::NonConducting);
        // Evidence on the target side works too.
        assert_eq!(scorer.predict(p(4), p(0)), Prediction::NonConducting);
    }

    #[test]
    fn test_ranking_order_and_ties() {
        let mut store = RelationStore::new(6);
        let mut clusters = ClusterEngine::new(6);
        // 5 has only NonConducting evidence, so it is predicted NonConducting.
        confirm(&mut store, &mut clusters, 5, 3, Relation::NonConducting);

        let scorer = InformationGainScorer::new(&store, &clusters);
        let ranked = scorer.rank(p(0)).unwrap();
        let order: Vec<_> = ranked.iter().map(|c| c.target.0).collect();
        assert_eq!(order, vec![3, 5, 1, 2, 4]);
        assert_eq!(ranked[0].gain, WEIGHT_NON_CONDUCTING);
    }

    #[test]
    fn test_source_inside_closed_cluster_has_no_candidates() {
        let mut store = RelationStore::new(4);
        let mut clusters = ClusterEngine::new(4);
        confirm(&mut store, &mut clusters, 0, 1, Relation::Conducting);
        confirm(&mut store, &mut clusters, 0, 2, Relation::Conducting);
        confirm(&mut store, &mut clusters, 0, 3, Relation::NonConducting);

        let scorer = InformationGainScorer::new(&store, &clusters);
        // (1,2) is still Unknown in the store but implied by the cluster.
        assert!(scorer.rank(p(0)).unwrap().is_empty());
        assert!(!scorer.has_candidates(p(0)).unwrap());
        assert!(scorer.has_candidates(p(1)).unwrap());
        assert_eq!(scorer.rank(p(1)).unwrap().iter().map(|c| c.target).collect::<Vec<_>>(), vec![p(3)]);
    }
}
