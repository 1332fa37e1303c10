//! Batch planner: the state machine that drives a planned session.
//!
//! The planner only decides. It picks a source and a target batch from
//! discovered knowledge, and the coordinator in `lib.rs` executes and
//! ingests the batch, then reports back through the transition methods:
//!
//! ```text
//! Init ─▶ Planning ─▶ Executing ─▶ Ingesting ─┬─▶ Planning
//!            │            │                   ├─▶ Converged
//!            │            └─▶ BudgetExhausted ├─▶ RoundsExhausted
//!            └─▶ Converged                    │
//!                          (any terminal) ─▶ Done
//! ```

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::cluster::ClusterEngine;
use crate::metrics::Metrics;
use crate::model::{PointId, TestId};
use crate::relations::RelationStore;
use crate::scoring::{Candidate, InformationGainScorer, PRIORITY_CLUSTERED, PRIORITY_UNCLUSTERED};
use crate::{Error, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Per-session limits and stop targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_rounds: u32,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub max_targets_per_source: usize,
    /// Fraction of resolved pairs, in `(0, 1]`.
    pub detection_target: f64,
    /// Cluster accuracy in percent, in `(0, 100]`. Ignored without ground truth.
    pub accuracy_target: f64,
    /// New relay ceiling, applied when the session starts and kept afterwards.
    pub max_relay_operations: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_rounds: 1_000,
            min_batch_size: 1,
            max_batch_size: 64,
            max_targets_per_source: 256,
            detection_target: 0.95,
            accuracy_target: 100.0,
            max_relay_operations: None,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfiguration(msg));
        if self.max_rounds == 0 {
            return invalid("max_rounds must be positive".into());
        }
        if self.min_batch_size == 0 {
            return invalid("min_batch_size must be at least 1".into());
        }
        if self.min_batch_size > self.max_batch_size {
            return invalid(format!(
                "batch size bounds inverted: min {} > max {}",
                self.min_batch_size, self.max_batch_size
            ));
        }
        if self.max_targets_per_source == 0 {
            return invalid("max_targets_per_source must be at least 1".into());
        }
        if !(self.detection_target > 0.0 && self.detection_target <= 1.0) {
            return invalid(format!("detection_target must be in (0, 1], got {}", self.detection_target));
        }
        if !(self.accuracy_target > 0.0 && self.accuracy_target <= 100.0) {
            return invalid(format!("accuracy_target must be in (0, 100], got {}", self.accuracy_target));
        }
        if self.max_relay_operations == Some(0) {
            return invalid("max_relay_operations must be positive".into());
        }
        Ok(())
    }
}

// ============================================================================
// States and results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerState {
    Init,
    Planning,
    Executing,
    Ingesting,
    Converged,
    BudgetExhausted,
    RoundsExhausted,
    Done,
}

impl PlannerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::BudgetExhausted | Self::RoundsExhausted | Self::Done)
    }
}

/// Why a session stopped. Both exhaustion cases are normal outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Targets met, or no source has anything left to test.
    Converged,
    BudgetExhausted,
    RoundsExhausted,
}

/// The next batch chosen by the planner.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub source: PointId,
    pub targets: Vec<PointId>,
    /// Candidates ranked for this source before clamping.
    pub candidates: usize,
}

/// Returned by `RunPlannedSession`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub termination: Termination,
    pub final_state: PlannerState,
    pub rounds_run: u32,
    /// Operations charged during this session only.
    pub relay_operations_used: u64,
    pub ambiguous_readings: u64,
    pub tests: Vec<TestId>,
    pub metrics: Metrics,
    pub elapsed_ms: u64,
}

// ============================================================================
// Planner
// ============================================================================

#[derive(Debug)]
pub struct BatchPlanner {
    config: SessionConfig,
    state: PlannerState,
    termination: Option<Termination>,
    rounds: u32,
    /// Round-robin position for the next source scan.
    cursor: u32,
    used_this_pass: HashSet<PointId>,
    /// Points found without candidates. Knowledge only grows, so they never get new ones.
    exhausted: HashSet<PointId>,
}

impl BatchPlanner {
    /// `Init`: validate the configuration and enter `Planning`.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let mut planner = Self {
            config,
            state: PlannerState::Init,
            termination: None,
            rounds: 0,
            cursor: 0,
            used_this_pass: HashSet::new(),
            exhausted: HashSet::new(),
        };
        planner.transition(PlannerState::Planning);
        Ok(planner)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> PlannerState {
        self.state
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn transition(&mut self, to: PlannerState) {
        tracing::debug!(from = ?self.state, to = ?to, round = self.rounds, "planner transition");
        self.state = to;
        self.termination = match to {
            PlannerState::Converged => Some(Termination::Converged),
            PlannerState::BudgetExhausted => Some(Termination::BudgetExhausted),
            PlannerState::RoundsExhausted => Some(Termination::RoundsExhausted),
            _ => self.termination,
        };
    }

    /// `Planning`: choose the next batch, or converge when no source has
    /// anything left to test.
    ///
    /// `affordable` is the relay controller's estimate of how many targets
    /// the remaining budget still covers.
    pub fn plan(&mut self, relations: &RelationStore, clusters: &ClusterEngine, affordable: usize) -> Option<BatchRequest> {
        if self.state != PlannerState::Planning {
            return None;
        }
        let scorer = InformationGainScorer::new(relations, clusters);
        let Some((source, ranked)) = self.select_source(&scorer, relations.total_points()) else {
            self.transition(PlannerState::Converged);
            return None;
        };

        let size = self.batch_size(ranked.len(), affordable);
        let targets: Vec<PointId> = ranked.iter().take(size).map(|c| c.target).collect();
        tracing::debug!(
            source = %source,
            candidates = ranked.len(),
            batch = targets.len(),
            top_gain = ranked.first().map(|c| c.gain),
            "batch planned"
        );
        self.transition(PlannerState::Executing);
        Some(BatchRequest { source, targets, candidates: ranked.len() })
    }

    /// Clamp to `[min_batch_size, min(max_batch_size, max_targets_per_source, affordable)]`,
    /// never beyond the candidates available.
    ///
    /// The lower bound wins over `affordable`: a budget too small for the
    /// minimum batch is left for the relay controller to reject.
    fn batch_size(&self, candidates: usize, affordable: usize) -> usize {
        let upper = self.config.max_batch_size.min(self.config.max_targets_per_source).min(affordable);
        let lower = self.config.min_batch_size.min(candidates);
        candidates.min(upper).max(lower)
    }

    /// Round-robin over unclustered sources first, then clustered ones.
    /// Starts a new pass once every source with candidates has been used.
    fn select_source(&mut self, scorer: &InformationGainScorer<'_>, total: u32) -> Option<(PointId, Vec<Candidate>)> {
        for _ in 0..2 {
            for tier in [PRIORITY_UNCLUSTERED, PRIORITY_CLUSTERED] {
                for offset in 0..total {
                    let point = PointId((self.cursor + offset) % total);
                    if self.used_this_pass.contains(&point) || self.exhausted.contains(&point) {
                        continue;
                    }
                    if scorer.source_priority(point).total_cmp(&tier).is_ne() {
                        continue;
                    }
                    let ranked = scorer.rank(point).unwrap_or_default();
                    if ranked.is_empty() {
                        self.exhausted.insert(point);
                        continue;
                    }
                    self.used_this_pass.insert(point);
                    self.cursor = (point.0 + 1) % total;
                    return Some((point, ranked));
                }
            }
            if self.used_this_pass.is_empty() {
                return None;
            }
            tracing::debug!(sources = self.used_this_pass.len(), "source pass complete");
            self.used_this_pass.clear();
        }
        None
    }

    /// `Executing` → `BudgetExhausted`: the relay controller rejected the batch.
    pub fn on_budget_exceeded(&mut self) {
        if self.state == PlannerState::Executing {
            self.transition(PlannerState::BudgetExhausted);
        }
    }

    /// `Executing` → `Ingesting`: the batch was read and committed.
    pub fn on_executed(&mut self) {
        if self.state == PlannerState::Executing {
            self.rounds += 1;
            self.transition(PlannerState::Ingesting);
        }
    }

    /// `Ingesting` → next state, judged on the metrics after the commit.
    /// Met targets take precedence over the round limit.
    pub fn on_ingested(&mut self, metrics: &Metrics) -> PlannerState {
        if self.state == PlannerState::Ingesting {
            let next = if metrics.meets(self.config.detection_target, self.config.accuracy_target) {
                PlannerState::Converged
            } else if self.rounds >= self.config.max_rounds {
                PlannerState::RoundsExhausted
            } else {
                PlannerState::Planning
            };
            self.transition(next);
        }
        self.state
    }

    /// Enter `Done` and report why the session stopped.
    /// `None` while the planner has not reached a terminal state.
    pub fn finish(&mut self) -> Option<Termination> {
        if !self.state.is_terminal() {
            return None;
        }
        if self.state != PlannerState::Done {
            self.transition(PlannerState::Done);
        }
        self.termination
    }
}
