//! # Relation Store
//!
//! Evolving knowledge about every unordered point pair.
//!
//! Only non-Unknown cells are stored, keyed by the canonical [`PairKey`];
//! a missing entry is Unknown. Memory grows with what has been learned,
//! not with N².
//!
//! ## Invariants
//!
//! - `get(i, j) == get(j, i)`: there is one entry per unordered pair.
//! - Monotonic: an entry is never removed or overwritten. A contradicting
//!   reading is counted as an inconsistency and the first value is kept.

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::model::{PairKey, PointId, Relation, RelationState};
use crate::{Error, Result};

/// What `apply` did with a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Cell left Unknown and now holds the reading.
    Recorded,
    /// Cell already held the same value.
    Unchanged,
    /// Cell already held the other value; it was kept.
    Inconsistent { kept: Relation, observed: Relation },
}

/// Counts of resolved and unresolved pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSummary {
    pub total_points: u32,
    pub conducting_pairs: u64,
    pub non_conducting_pairs: u64,
    pub unknown_pairs: u64,
}

/// Partners of one point grouped by relation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointRelations {
    pub point: PointId,
    pub conducting: Vec<PointId>,
    pub non_conducting: Vec<PointId>,
    pub unknown: Vec<PointId>,
}

/// Resolved cells touching one point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointDegree {
    pub resolved: u32,
    pub conducting: u32,
}

impl PointDegree {
    pub fn non_conducting(self) -> u32 {
        self.resolved - self.conducting
    }
}

/// Sparse symmetric relation matrix.
#[derive(Debug, Clone)]
pub struct RelationStore {
    total: u32,
    cells: HashMap<PairKey, Relation>,
    /// Pairs that were read at least once, whatever the reading.
    probed: HashSet<PairKey>,
    degrees: Vec<PointDegree>,
    conducting: u64,
    inconsistencies: u64,
}

impl RelationStore {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            cells: HashMap::new(),
            probed: HashSet::new(),
            degrees: vec![PointDegree::default(); total as usize],
            conducting: 0,
            inconsistencies: 0,
        }
    }

    pub fn total_points(&self) -> u32 {
        self.total
    }

    /// Number of off-diagonal unordered pairs.
    pub fn pair_count(&self) -> u64 {
        let n = u64::from(self.total);
        n * n.saturating_sub(1) / 2
    }

    fn key(&self, i: PointId, j: PointId) -> Result<PairKey> {
        i.check(self.total)?;
        j.check(self.total)?;
        PairKey::new(i, j).ok_or(Error::SelfPair { point: i.0 })
    }

    /// Current state of the cell `(i, j)`.
    pub fn get(&self, i: PointId, j: PointId) -> Result<RelationState> {
        let key = self.key(i, j)?;
        Ok(self.cells.get(&key).copied().map_or(RelationState::Unknown, RelationState::from))
    }

    /// Record a reading for `(source, target)`. First-confirmed wins.
    pub fn apply(&mut self, source: PointId, target: PointId, relation: Relation) -> Result<ApplyOutcome> {
        let key = self.key(source, target)?;
        self.probed.insert(key);
        match self.cells.get(&key).copied() {
            None => {
                self.cells.insert(key, relation);
                let conducting = u32::from(relation == Relation::Conducting);
                for end in [key.lo(), key.hi()] {
                    let degree = &mut self.degrees[end.index()];
                    degree.resolved += 1;
                    degree.conducting += conducting;
                }
                self.conducting += u64::from(conducting);
                Ok(ApplyOutcome::Recorded)
            }
            Some(existing) if existing == relation => Ok(ApplyOutcome::Unchanged),
            Some(existing) => {
                self.inconsistencies += 1;
                tracing::warn!(
                    source = %source,
                    target = %target,
                    kept = ?existing,
                    observed = ?relation,
                    "matrix inconsistency: reading contradicts confirmed cell"
                );
                Ok(ApplyOutcome::Inconsistent { kept: existing, observed: relation })
            }
        }
    }

    /// Remember that a pair was read without a usable result.
    pub fn mark_probed(&mut self, source: PointId, target: PointId) -> Result<()> {
        let key = self.key(source, target)?;
        self.probed.insert(key);
        Ok(())
    }

    /// Other points whose relation to `point` is still Unknown.
    ///
    /// Derived from the current cells on every call.
    pub fn unresolved_for(&self, point: PointId) -> Result<impl Iterator<Item = PointId> + '_> {
        point.check(self.total)?;
        Ok((0..self.total).map(PointId).filter(move |&other| {
            PairKey::new(point, other).is_some_and(|key| !self.cells.contains_key(&key))
        }))
    }

    pub fn relations_of(&self, point: PointId) -> Result<PointRelations> {
        point.check(self.total)?;
        let mut out = PointRelations {
            point,
            conducting: Vec::new(),
            non_conducting: Vec::new(),
            unknown: Vec::new(),
        };
        for other in (0..self.total).map(PointId) {
            let Some(key) = PairKey::new(point, other) else { continue };
            match self.cells.get(&key) {
                Some(Relation::Conducting) => out.conducting.push(other),
                Some(Relation::NonConducting) => out.non_conducting.push(other),
                None => out.unknown.push(other),
            }
        }
        Ok(out)
    }

    pub fn degree(&self, point: PointId) -> Result<PointDegree> {
        point.check(self.total)?;
        Ok(self.degrees[point.index()])
    }

    /// Known cells in no particular order.
    pub fn cells(&self) -> impl Iterator<Item = (PairKey, Relation)> + '_ {
        self.cells.iter().map(|(k, v)| (*k, *v))
    }

    pub fn resolved_count(&self) -> u64 {
        self.cells.len() as u64
    }

    pub fn conducting_count(&self) -> u64 {
        self.conducting
    }

    pub fn non_conducting_count(&self) -> u64 {
        self.resolved_count() - self.conducting
    }

    pub fn probed_count(&self) -> u64 {
        self.probed.len() as u64
    }

    pub fn inconsistencies(&self) -> u64 {
        self.inconsistencies
    }

    /// Fraction of off-diagonal cells no longer Unknown.
    pub fn detection_rate(&self) -> f64 {
        ratio(self.resolved_count(), self.pair_count())
    }

    /// Fraction of pairs read at least once.
    pub fn coverage(&self) -> f64 {
        ratio(self.probed_count(), self.pair_count())
    }

    pub fn summary(&self) -> RelationSummary {
        RelationSummary {
            total_points: self.total,
            conducting_pairs: self.conducting_count(),
            non_conducting_pairs: self.non_conducting_count(),
            unknown_pairs: self.pair_count() - self.resolved_count(),
        }
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}
