//! Hidden wiring used to score discovered knowledge.
//!
//! A `GroundTruth` is the fully-populated relation matrix stored in
//! partition form: every point maps to the index of its real cluster, so
//! `(i, j)` conducts iff both land in the same cluster. It is generated
//! once per system lifetime (or per reset) and never mutated; the
//! planner and scorer never see it.

use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::model::{PointId, Relation};
use crate::{Error, Result};

/// How real cluster sizes are drawn when generating wiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "sizes", rename_all = "snake_case")]
pub enum ClusterDistribution {
    /// Share of all points that sit in clusters of each size.
    Shares(BTreeMap<usize, f64>),
    /// Exact number of clusters of each size.
    Counts(BTreeMap<usize, usize>),
}

impl Default for ClusterDistribution {
    /// 90% isolated, 6% pairs, 3% triples, 1% quads.
    fn default() -> Self {
        ClusterDistribution::Shares(BTreeMap::from([(1, 0.90), (2, 0.06), (3, 0.03), (4, 0.01)]))
    }
}

impl ClusterDistribution {
    pub fn validate(&self) -> Result<()> {
        match self {
            ClusterDistribution::Shares(shares) => {
                if shares.keys().any(|&size| size == 0) {
                    return Err(Error::InvalidConfiguration("cluster size 0 in distribution".into()));
                }
                if shares.values().any(|s| !(0.0..=1.0).contains(s)) {
                    return Err(Error::InvalidConfiguration("distribution share outside [0, 1]".into()));
                }
                let sum: f64 = shares.values().sum();
                if sum > 1.0 + 1e-9 {
                    return Err(Error::InvalidConfiguration(format!(
                        "distribution shares sum to {sum:.3} > 1"
                    )));
                }
                Ok(())
            }
            ClusterDistribution::Counts(counts) => {
                if counts.keys().any(|&size| size == 0) {
                    return Err(Error::InvalidConfiguration("cluster size 0 in distribution".into()));
                }
                Ok(())
            }
        }
    }

    /// `(size, cluster count)` for every multi-point size, largest first.
    fn cluster_counts(&self, total: u32) -> Vec<(usize, usize)> {
        let mut out: Vec<(usize, usize)> = match self {
            ClusterDistribution::Shares(shares) => shares
                .iter()
                .filter(|&(&size, _)| size >= 2)
                .map(|(&size, &share)| {
                    let points = f64::from(total) * share;
                    (size, (points / size as f64).round() as usize)
                })
                .collect(),
            ClusterDistribution::Counts(counts) => counts
                .iter()
                .filter(|&(&size, _)| size >= 2)
                .map(|(&size, &count)| (size, count))
                .collect(),
        };
        out.sort_by(|a, b| b.0.cmp(&a.0));
        out
    }
}

/// The real wiring, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroundTruth {
    total: u32,
    /// Point index -> cluster index.
    #[serde(skip)]
    cluster_of: Vec<u32>,
    /// Sorted members; clusters ordered by their lowest member.
    clusters: Vec<Vec<PointId>>,
}

impl GroundTruth {
    /// Draw random wiring over `total` points.
    pub fn generate<R: Rng + ?Sized>(
        total: u32,
        distribution: &ClusterDistribution,
        rng: &mut R,
    ) -> Result<Self> {
        distribution.validate()?;
        let mut order: Vec<PointId> = (0..total).map(PointId).collect();
        order.shuffle(rng);

        let mut groups: Vec<Vec<PointId>> = Vec::new();
        let mut cursor = 0usize;
        for (size, count) in distribution.cluster_counts(total) {
            for _ in 0..count {
                if cursor + size > order.len() {
                    if matches!(distribution, ClusterDistribution::Counts(_)) {
                        return Err(Error::InvalidConfiguration(format!(
                            "distribution needs more than {total} points"
                        )));
                    }
                    tracing::warn!(size, total, "distribution truncated: not enough points left");
                    break;
                }
                groups.push(order[cursor..cursor + size].to_vec());
                cursor += size;
            }
        }
        groups.extend(order[cursor..].iter().map(|&p| vec![p]));

        let truth = Self::build(total, groups);
        tracing::debug!(
            total,
            real_clusters = truth.real_clusters().count(),
            "ground truth generated"
        );
        Ok(truth)
    }

    /// Wiring from explicit groups; unmentioned points are isolated.
    pub fn from_clusters<I, G>(total: u32, groups: I) -> Result<Self>
    where
        I: IntoIterator<Item = G>,
        G: IntoIterator<Item = u32>,
    {
        let mut seen = vec![false; total as usize];
        let mut out: Vec<Vec<PointId>> = Vec::new();
        for group in groups {
            let mut members = Vec::new();
            for raw in group {
                let p = PointId(raw).check(total)?;
                if std::mem::replace(&mut seen[p.index()], true) {
                    return Err(Error::InvalidConfiguration(format!("point {p} appears in two clusters")));
                }
                members.push(p);
            }
            if !members.is_empty() {
                out.push(members);
            }
        }
        out.extend(
            seen.iter()
                .enumerate()
                .filter(|(_, used)| !**used)
                .map(|(i, _)| vec![PointId(i as u32)]),
        );
        Ok(Self::build(total, out))
    }

    fn build(total: u32, mut groups: Vec<Vec<PointId>>) -> Self {
        for g in &mut groups {
            g.sort_unstable();
        }
        groups.sort_unstable_by_key(|g| g[0]);
        let mut cluster_of = vec![0u32; total as usize];
        for (idx, g) in groups.iter().enumerate() {
            for p in g {
                cluster_of[p.index()] = idx as u32;
            }
        }
        Self { total, cluster_of, clusters: groups }
    }

    pub fn total_points(&self) -> u32 {
        self.total
    }

    /// Unchecked lookup; callers validate ids first.
    pub(crate) fn conducts(&self, a: PointId, b: PointId) -> bool {
        self.cluster_of[a.index()] == self.cluster_of[b.index()]
    }

    /// Members of the real cluster holding `point` (unchecked).
    pub(crate) fn cluster_containing(&self, point: PointId) -> &[PointId] {
        &self.clusters[self.cluster_of[point.index()] as usize]
    }

    pub fn relation(&self, a: PointId, b: PointId) -> Result<Relation> {
        a.check(self.total)?;
        b.check(self.total)?;
        if a == b {
            return Err(Error::SelfPair { point: a.0 });
        }
        Ok(if self.conducts(a, b) { Relation::Conducting } else { Relation::NonConducting })
    }

    /// Every cluster including isolated points.
    pub fn clusters(&self) -> &[Vec<PointId>] {
        &self.clusters
    }

    /// Clusters with at least two members.
    pub fn real_clusters(&self) -> impl Iterator<Item = &[PointId]> + '_ {
        self.clusters.iter().filter(|c| c.len() >= 2).map(Vec::as_slice)
    }

    /// Points that conduct with `point`.
    pub fn conductive_targets(&self, point: PointId) -> Result<Vec<PointId>> {
        point.check(self.total)?;
        Ok(self.cluster_containing(point).iter().copied().filter(|&p| p != point).collect())
    }

    /// Number of conducting unordered pairs.
    pub fn conducting_pairs(&self) -> u64 {
        self.clusters
            .iter()
            .map(|c| {
                let k = c.len() as u64;
                k * k.saturating_sub(1) / 2
            })
            .sum()
    }
}
