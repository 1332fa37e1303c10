//! # Relay Controller
//!
//! Models the relay matrix: one energized source at a time, a set of
//! targets switched into read mode, and a hard ceiling on the number of
//! relay operations. Owns the append-only test history.
//!
//! A batch goes through two steps:
//!
//! 1. [`RelayController::plan_batch`] validates ids, prices the batch and
//!    checks the budget. Nothing is mutated; a rejected batch leaves no trace.
//! 2. [`RelayController::commit_batch`] switches relay states, charges the
//!    operations and appends the [`TestRecord`], all at once.
//!
//! The hardware read happens between the two, outside any lock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{PointId, Reading, RelayState, TargetOutcome, TestId, TestRecord};
use crate::{Error, Result};

/// How a batch is priced in relay operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayCostModel {
    /// 1 for the source, 1 per target.
    #[default]
    PerTarget,
    /// 1 for the source; targets share a passive read path.
    SharedReadPath,
    /// 1 per relay whose state changes relative to the previous batch.
    Incremental,
}

/// A priced, budget-checked batch that has not run yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub source: PointId,
    /// Targets as the caller asked for them.
    pub requested: Vec<PointId>,
    /// Normalized targets: sorted, deduplicated, source removed.
    pub targets: Vec<PointId>,
    pub cost: u64,
    pub power_on: u64,
}

/// Relay counters as reported by `QueryRelayStats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    pub total_operations: u64,
    pub power_on_count: u64,
    pub current_source: Option<PointId>,
    pub active_points: usize,
    pub ceiling: u64,
    pub remaining: u64,
    pub tests_run: usize,
}

#[derive(Debug, Clone)]
pub struct RelayController {
    total: u32,
    cost_model: RelayCostModel,
    ceiling: u64,
    used: u64,
    power_on_count: u64,
    states: Vec<RelayState>,
    current_source: Option<PointId>,
    /// Targets left in read mode by the last batch, sorted.
    active_targets: Vec<PointId>,
    history: Vec<TestRecord>,
}

impl RelayController {
    pub fn new(total: u32, ceiling: u64, cost_model: RelayCostModel) -> Self {
        Self {
            total,
            cost_model,
            ceiling,
            used: 0,
            power_on_count: 0,
            states: vec![RelayState::Off; total as usize],
            current_source: None,
            active_targets: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn cost_model(&self) -> RelayCostModel {
        self.cost_model
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Replace the ceiling for subsequent batches. Operations already used stay counted.
    pub fn set_ceiling(&mut self, ceiling: u64) {
        self.ceiling = ceiling;
    }

    pub fn remaining_budget(&self) -> u64 {
        self.ceiling.saturating_sub(self.used)
    }

    /// Conservative number of targets a batch can still afford.
    pub fn affordable_targets(&self) -> usize {
        let remaining = self.remaining_budget();
        let available = match self.cost_model {
            RelayCostModel::PerTarget => remaining.saturating_sub(1),
            RelayCostModel::SharedReadPath if remaining >= 1 => u64::MAX,
            RelayCostModel::SharedReadPath => 0,
            // Worst case: every relay left on by the previous batch must be switched off.
            RelayCostModel::Incremental => {
                let previous = self.active_targets.len() as u64 + u64::from(self.current_source.is_some());
                remaining.saturating_sub(1 + previous)
            }
        };
        usize::try_from(available).unwrap_or(usize::MAX)
    }

    pub fn relay_state(&self, point: PointId) -> Result<RelayState> {
        point.check(self.total)?;
        Ok(self.states[point.index()])
    }

    pub fn history(&self) -> &[TestRecord] {
        &self.history
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            total_operations: self.used,
            power_on_count: self.power_on_count,
            current_source: self.current_source,
            active_points: self.active_targets.len() + usize::from(self.current_source.is_some()),
            ceiling: self.ceiling,
            remaining: self.remaining_budget(),
            tests_run: self.history.len(),
        }
    }

    fn price(&self, source: PointId, targets: &[PointId]) -> (u64, u64) {
        match self.cost_model {
            RelayCostModel::PerTarget => (1 + targets.len() as u64, 1),
            RelayCostModel::SharedReadPath => (1, 1),
            RelayCostModel::Incremental => {
                let was_on = |p: PointId| self.states[p.index()] == RelayState::On;
                let switched_on = targets.iter().filter(|&&t| !was_on(t)).count()
                    + usize::from(!was_on(source));
                let previous = self.current_source.iter().chain(self.active_targets.iter());
                let switched_off = previous
                    .filter(|&&p| p != source && targets.binary_search(&p).is_err())
                    .count();
                let power_on = u64::from(self.current_source != Some(source));
                ((switched_on + switched_off) as u64, power_on)
            }
        }
    }

    /// Validate, price and budget-check a batch without executing it.
    ///
    /// The source is dropped from its own target list and duplicates are
    /// removed; targets come back sorted.
    pub fn plan_batch(&self, source: PointId, requested: Vec<PointId>) -> Result<BatchPlan> {
        source.check(self.total)?;
        for &t in &requested {
            t.check(self.total)?;
        }
        let mut targets = requested.clone();
        targets.retain(|&t| t != source);
        targets.sort_unstable();
        targets.dedup();
        if targets.is_empty() {
            return Err(Error::EmptyBatch { point: source.0 });
        }

        let (cost, power_on) = self.price(source, &targets);
        let exceeds = self.used.checked_add(cost).is_none_or(|total| total > self.ceiling);
        if exceeds {
            tracing::warn!(
                source = %source,
                targets = targets.len(),
                required = cost,
                used = self.used,
                ceiling = self.ceiling,
                "batch rejected: relay budget exceeded"
            );
            return Err(Error::RelayBudgetExceeded { required: cost, used: self.used, ceiling: self.ceiling });
        }
        Ok(BatchPlan { source, requested, targets, cost, power_on })
    }

    /// Apply a planned batch: switch relays, charge operations, log the record.
    ///
    /// `readings` must be aligned with `plan.targets`; see
    /// [`crate::probe::align_readings`].
    pub fn commit_batch(
        &mut self,
        plan: BatchPlan,
        readings: Vec<Reading>,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> &TestRecord {
        for p in self.current_source.iter().chain(self.active_targets.iter()) {
            self.states[p.index()] = RelayState::Off;
        }
        self.states[plan.source.index()] = RelayState::On;
        for t in &plan.targets {
            self.states[t.index()] = RelayState::On;
        }
        self.current_source = Some(plan.source);
        self.active_targets.clone_from(&plan.targets);
        self.used += plan.cost;
        self.power_on_count += plan.power_on;

        let outcomes = plan
            .targets
            .iter()
            .zip(readings)
            .map(|(&target, reading)| TargetOutcome { target, reading })
            .collect();
        let record = TestRecord {
            id: TestId(self.history.len() as u64 + 1),
            timestamp: started_at,
            source: plan.source,
            requested: plan.requested,
            targets: plan.targets,
            outcomes,
            duration,
            relay_operations: plan.cost,
            power_on_operations: plan.power_on,
        };
        tracing::debug!(
            test = %record.id,
            source = %record.source,
            targets = record.targets.len(),
            ops = record.relay_operations,
            used = self.used,
            "batch committed"
        );
        self.history.push(record);
        &self.history[self.history.len() - 1]
    }
}
