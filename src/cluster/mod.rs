//! # Cluster Engine
//!
//! Partition of the points known to be mutually conducting.
//!
//! Only points with at least one confirmed Conducting relation are
//! tracked. The partition is a union-find keyed by point id; the root of
//! every set is its lowest member, which doubles as the cluster's
//! representative. Clusters only ever merge.
//!
//! ```text
//! on_conducting(0, 1)   {0,1}            Formed
//! on_conducting(1, 2)   {0,1,2}          Joined
//! on_conducting(5, 6)   {0,1,2} {5,6}    Formed
//! on_conducting(6, 2)   {0,1,2,5,6}      Merged (5 absorbed into 0)
//! ```

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::ground_truth::GroundTruth;
use crate::model::PointId;
use crate::{Error, Result};

/// Wiring label derived from cluster size, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    OneToOne,
    OneToMany,
}

/// A discovered cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub representative: PointId,
    /// Sorted, always contains `representative`.
    pub members: Vec<PointId>,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, point: PointId) -> bool {
        self.members.binary_search(&point).is_ok()
    }

    pub fn kind(&self) -> ConnectionKind {
        if self.members.len() > 2 { ConnectionKind::OneToMany } else { ConnectionKind::OneToOne }
    }
}

/// Structural change caused by one Conducting relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClusterEvent {
    /// Two unclustered points formed a new cluster.
    Formed { representative: PointId, members: SmallVec<[PointId; 2]> },
    /// An unclustered point joined an existing cluster.
    Joined { representative: PointId, point: PointId },
    /// Two clusters became one; `absorbed` is the retired representative.
    Merged { representative: PointId, absorbed: PointId, size: usize },
}

/// How one discovered cluster relates to the real wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Same member set as a real cluster.
    Exact,
    /// Strict subset of a real cluster.
    Partial,
    /// Spans more than one real cluster.
    Spurious,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMatch {
    pub representative: PointId,
    pub members: Vec<PointId>,
    pub status: MatchStatus,
    /// Lowest member of the real cluster holding the representative.
    pub real_representative: PointId,
}

/// Result of `CompareToGroundTruth`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterComparison {
    pub matched: usize,
    pub real_clusters: usize,
    pub discovered_clusters: usize,
    /// `matched / real_clusters * 100`.
    pub accuracy_rate: f64,
    pub matches: Vec<ClusterMatch>,
}

#[derive(Debug, Clone)]
pub struct ClusterEngine {
    total: u32,
    /// Clustered point -> parent; roots point to themselves.
    parent: HashMap<PointId, PointId>,
    /// Root -> members.
    members: BTreeMap<PointId, BTreeSet<PointId>>,
}

impl ClusterEngine {
    pub fn new(total: u32) -> Self {
        Self { total, parent: HashMap::new(), members: BTreeMap::new() }
    }

    fn check_pair(&self, i: PointId, j: PointId) -> Result<()> {
        i.check(self.total)?;
        j.check(self.total)?;
        if i == j {
            return Err(Error::SelfPair { point: i.0 });
        }
        Ok(())
    }

    /// Representative of the cluster holding `point`, if any.
    pub fn cluster_of(&self, point: PointId) -> Option<PointId> {
        let mut cur = *self.parent.get(&point)?;
        while let Some(&next) = self.parent.get(&cur) {
            if next == cur {
                break;
            }
            cur = next;
        }
        Some(cur)
    }

    fn find_compress(&mut self, point: PointId) -> Option<PointId> {
        let root = self.cluster_of(point)?;
        let mut cur = point;
        while cur != root {
            let next = self.parent.insert(cur, root).unwrap_or(root);
            cur = next;
        }
        Some(root)
    }

    pub fn is_clustered(&self, point: PointId) -> bool {
        self.parent.contains_key(&point)
    }

    pub fn same_cluster(&self, a: PointId, b: PointId) -> bool {
        match (self.cluster_of(a), self.cluster_of(b)) {
            (Some(ra), Some(rb)) => ra == rb,
            _ => false,
        }
    }

    /// Members of the cluster holding `point`; empty when unclustered.
    pub fn members_of(&self, point: PointId) -> impl Iterator<Item = PointId> + '_ {
        self.cluster_of(point)
            .and_then(|root| self.members.get(&root))
            .into_iter()
            .flatten()
            .copied()
    }

    pub fn cluster_count(&self) -> usize {
        self.members.len()
    }

    pub fn clustered_points(&self) -> usize {
        self.parent.len()
    }

    /// Points not in any cluster, ascending.
    pub fn unclustered(&self) -> impl Iterator<Item = PointId> + '_ {
        (0..self.total).map(PointId).filter(move |p| !self.parent.contains_key(p))
    }

    /// Record a confirmed Conducting relation.
    ///
    /// Returns `None` when `i` and `j` were already in the same cluster.
    pub fn on_conducting(&mut self, i: PointId, j: PointId) -> Result<Option<ClusterEvent>> {
        self.check_pair(i, j)?;
        let ri = self.find_compress(i);
        let rj = self.find_compress(j);
        if ri.is_some() && ri == rj {
            return Ok(None);
        }

        let a = ri.unwrap_or(i);
        let b = rj.unwrap_or(j);
        let (keep, absorb) = if a < b { (a, b) } else { (b, a) };

        let absorbed = self.members.remove(&absorb).unwrap_or_else(|| BTreeSet::from([absorb]));
        let absorbed_size = absorbed.len();
        self.parent.insert(absorb, keep);
        self.parent.entry(keep).or_insert(keep);
        let kept = self.members.entry(keep).or_insert_with(|| BTreeSet::from([keep]));
        kept.extend(absorbed);
        let size = kept.len();

        let event = match (ri, rj) {
            (None, None) => ClusterEvent::Formed {
                representative: keep,
                members: SmallVec::from_buf([keep, absorb]),
            },
            (Some(_), None) => ClusterEvent::Joined { representative: keep, point: j },
            (None, Some(_)) => ClusterEvent::Joined { representative: keep, point: i },
            (Some(_), Some(_)) => ClusterEvent::Merged { representative: keep, absorbed: absorb, size },
        };
        tracing::debug!(?event, absorbed_size, "cluster update");
        Ok(Some(event))
    }

    /// Record a confirmed NonConducting relation. Never splits anything.
    pub fn on_non_conducting(&mut self, i: PointId, j: PointId) -> Result<()> {
        self.check_pair(i, j)
    }

    /// Current partition, ordered by representative.
    pub fn list(&self) -> Vec<Cluster> {
        self.members
            .iter()
            .map(|(&representative, members)| Cluster {
                representative,
                members: members.iter().copied().collect(),
            })
            .collect()
    }

    /// Match discovered clusters against the real wiring by exact set equality.
    pub fn compare_to_ground_truth(&self, truth: &GroundTruth) -> ClusterComparison {
        let real_clusters = truth.real_clusters().count();
        let mut matched = 0;
        let mut matches = Vec::with_capacity(self.members.len());

        for cluster in self.list() {
            let real = truth.cluster_containing(cluster.representative);
            let status = if real == cluster.members.as_slice() {
                matched += 1;
                MatchStatus::Exact
            } else if cluster.members.iter().all(|m| real.binary_search(m).is_ok()) {
                MatchStatus::Partial
            } else {
                MatchStatus::Spurious
            };
            matches.push(ClusterMatch {
                representative: cluster.representative,
                members: cluster.members,
                status,
                real_representative: real[0],
            });
        }

        let discovered_clusters = matches.len();
        let accuracy_rate = match real_clusters {
            0 if discovered_clusters == 0 => 100.0,
            0 => 0.0,
            n => matched as f64 / n as f64 * 100.0,
        };
        ClusterComparison { matched, real_clusters, discovered_clusters, accuracy_rate, matches }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn p(i: u32) -> PointId {
        PointId(i)
    }

    fn ids(raw: &[u32]) -> Vec<PointId> {
        raw.iter().copied().map(PointId).collect()
    }

    #[test]
    fn test_formed_joined_merged() {
        let mut engine = ClusterEngine::new(10);

        let e = engine.on_conducting(p(1), p(0)).unwrap();
        assert_eq!(e, Some(ClusterEvent::Formed { representative: p(0), members: SmallVec::from_buf([p(0), p(1)]) }));

        let e = engine.on_conducting(p(1), p(2)).unwrap();
        assert_eq!(e, Some(ClusterEvent::Joined { representative: p(0), point: p(2) }));

        engine.on_conducting(p(5), p(6)).unwrap();
        let e = engine.on_conducting(p(6), p(2)).unwrap();
        assert_eq!(e, Some(ClusterEvent::Merged { representative: p(0), absorbed: p(5), size: 5 }));

        assert_eq!(engine.list(), vec![Cluster { representative: p(0), members: ids(&[0, 1, 2, 5, 6]) }]);
        assert_eq!(engine.cluster_of(p(6)), Some(p(0)));
    }

    #[test]
    fn test_lower_id_joining_becomes_representative() {
        let mut engine = ClusterEngine::new(10);
        engine.on_conducting(p(4), p(7)).unwrap();
        let e = engine.on_conducting(p(2), p(7)).unwrap();
        assert_eq!(e, Some(ClusterEvent::Joined { representative: p(2), point: p(2) }));
        assert_eq!(engine.cluster_of(p(4)), Some(p(2)));
        assert_eq!(engine.list()[0].members, ids(&[2, 4, 7]));
    }

    #[test]
    fn test_repeat_is_noop() {
        let mut engine = ClusterEngine::new(4);
        engine.on_conducting(p(0), p(1)).unwrap();
        assert_eq!(engine.on_conducting(p(1), p(0)).unwrap(), None);
        assert_eq!(engine.cluster_count(), 1);
    }

    #[test]
    fn test_non_conducting_changes_nothing() {
        let mut engine = ClusterEngine::new(4);
        engine.on_conducting(p(0), p(1)).unwrap();
        engine.on_non_conducting(p(0), p(1)).unwrap();
        engine.on_non_conducting(p(2), p(3)).unwrap();
        assert_eq!(engine.list().len(), 1);
        assert!(!engine.is_clustered(p(2)));
        assert!(engine.on_non_conducting(p(2), p(2)).is_err());
    }

    #[test]
    fn test_transitivity() {
        let mut engine = ClusterEngine::new(6);
        engine.on_conducting(p(3), p(1)).unwrap();
        engine.on_conducting(p(1), p(5)).unwrap();
        assert!(engine.same_cluster(p(3), p(5)));
        assert_eq!(engine.members_of(p(5)).collect::<Vec<_>>(), ids(&[1, 3, 5]));
        assert_eq!(engine.unclustered().collect::<Vec<_>>(), ids(&[0, 2, 4]));
    }

    #[test]
    fn test_connection_kind() {
        let pair = Cluster { representative: p(0), members: ids(&[0, 1]) };
        let triple = Cluster { representative: p(0), members: ids(&[0, 1, 2]) };
        assert_eq!(pair.kind(), ConnectionKind::OneToOne);
        assert_eq!(triple.kind(), ConnectionKind::OneToMany);
    }

    #[test]
    fn test_compare_exact_partial_spurious() {
        let truth = GroundTruth::from_clusters(12, [vec![0, 1, 2], vec![3, 4, 5], vec![6, 7], vec![8, 9]]).unwrap();
        let mut engine = ClusterEngine::new(12);
        engine.on_conducting(p(0), p(1)).unwrap();
        engine.on_conducting(p(0), p(2)).unwrap(); // exact
        engine.on_conducting(p(3), p(4)).unwrap(); // partial
        engine.on_conducting(p(6), p(7)).unwrap();
        engine.on_conducting(p(7), p(8)).unwrap(); // spurious: {6,7,8}

        let cmp = engine.compare_to_ground_truth(&truth);
        assert_eq!(cmp.matched, 1);
        assert_eq!(cmp.real_clusters, 4);
        assert_eq!(cmp.discovered_clusters, 3);
        assert!((cmp.accuracy_rate - 25.0).abs() < 1e-9);
        let statuses: Vec<_> = cmp.matches.iter().map(|m| m.status).collect();
        assert_eq!(statuses, vec![MatchStatus::Exact, MatchStatus::Partial, MatchStatus::Spurious]);
        assert_eq!(cmp.matches[2].real_representative, p(6));
    }

    #[test]
    fn test_compare_without_real_clusters() {
        let truth = GroundTruth::from_clusters(4, Vec::<Vec<u32>>::new()).unwrap();
        let engine = ClusterEngine::new(4);
        assert_eq!(engine.compare_to_ground_truth(&truth).accuracy_rate, 100.0);
    }
}
