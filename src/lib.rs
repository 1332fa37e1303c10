//! # relay-graph: Adaptive Connectivity Discovery
//!
//! Discovers which of `N` test points are electrically connected using as
//! few relay operations as possible. Confirmed connections are folded into
//! clusters, and each round tests the pairs with the highest expected
//! information gain.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `ContinuityProbe` is the contract between the planner and the hardware
//! 2. **Monotonic knowledge**: a confirmed cell never goes back to Unknown, clusters never split
//! 3. **Plan from evidence only**: the ground truth scores results, it never steers the planner
//! 4. **One writer**: every mutation runs inside a session; readers see whole batches
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relay_graph::{SessionConfig, SystemConfig, TestSystem};
//!
//! # async fn example() -> relay_graph::Result<()> {
//! let system = TestSystem::simulated(SystemConfig::with_points(200))?;
//!
//! let summary = system.run_planned_session(SessionConfig::default()).await?;
//! println!("{:?} after {} rounds", summary.termination, summary.rounds_run);
//!
//! for cluster in system.clusters() {
//!     println!("{} -> {:?}", cluster.representative, cluster.members);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Probes
//!
//! | Probe | Feature | Description |
//! |-------|---------|-------------|
//! | Simulated | (default) | Reads a hidden ground truth, for tests and evaluation |
//! | Simulated + delay | `latency` | Sleeps per batch on the tokio timer |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod relations;
pub mod relay;
pub mod scoring;
pub mod cluster;
pub mod ground_truth;
pub mod planner;
pub mod metrics;
pub mod probe;
pub mod session;
pub mod config;
pub mod export;

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::model::Relation;
use crate::relations::ApplyOutcome;
use crate::session::{SessionGate, SessionGuard, SessionKind};

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{
    PointId, PointState, RelayState, PairKey, Reading, RelationState,
    TargetOutcome, TestId, TestRecord,
};

// ============================================================================
// Re-exports: Components
// ============================================================================

pub use cluster::{Cluster, ClusterComparison, ClusterEvent, ConnectionKind, MatchStatus};
pub use config::SystemConfig;
pub use ground_truth::{ClusterDistribution, GroundTruth};
pub use metrics::{Metrics, PairComparison};
pub use planner::{PlannerState, SessionConfig, SessionSummary, Termination};
pub use probe::{ContinuityProbe, SimulatedProbe};
pub use relations::{PointRelations, RelationSummary};
pub use relay::{RelayCostModel, RelayStats};
pub use session::SessionId;

// ============================================================================
// Operation results
// ============================================================================

/// Outcome of one executed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    /// Readings, duration and relay operations of the batch.
    pub record: TestRecord,
    pub cluster_events: Vec<ClusterEvent>,
    /// Readings that contradicted an already confirmed cell.
    pub inconsistencies: usize,
}

#[derive(Debug, Clone)]
pub struct ResetReport {
    pub total_points: u32,
    /// The new wiring; `None` on physical hardware.
    pub ground_truth: Option<Arc<GroundTruth>>,
}

// ============================================================================
// Top-level TestSystem handle
// ============================================================================

/// Everything one writer may mutate, behind one lock.
struct SystemState {
    relations: relations::RelationStore,
    clusters: cluster::ClusterEngine,
    relay: relay::RelayController,
    ground_truth: Option<Arc<GroundTruth>>,
}

impl SystemState {
    fn fresh(config: &SystemConfig, ground_truth: Option<Arc<GroundTruth>>) -> Self {
        let n = config.total_points;
        Self {
            relations: relations::RelationStore::new(n),
            clusters: cluster::ClusterEngine::new(n),
            relay: relay::RelayController::new(n, config.max_relay_operations, config.relay_cost),
            ground_truth,
        }
    }

    fn metrics(&self) -> Metrics {
        metrics::compute(&self.relations, &self.clusters, &self.relay, self.ground_truth.as_deref())
    }

    /// Feed a committed record into the store and the partition.
    fn ingest(&mut self, record: &TestRecord) -> Result<(Vec<ClusterEvent>, usize)> {
        let mut cluster_events = Vec::new();
        let mut inconsistencies = 0;
        for outcome in &record.outcomes {
            let Some(relation) = outcome.reading.relation() else {
                self.relations.mark_probed(record.source, outcome.target)?;
                continue;
            };
            match self.relations.apply(record.source, outcome.target, relation)? {
                ApplyOutcome::Recorded => {}
                ApplyOutcome::Unchanged => continue,
                ApplyOutcome::Inconsistent { .. } => {
                    inconsistencies += 1;
                    continue;
                }
            }
            match relation {
                Relation::Conducting => {
                    cluster_events.extend(self.clusters.on_conducting(record.source, outcome.target)?);
                }
                Relation::NonConducting => self.clusters.on_non_conducting(record.source, outcome.target)?,
            }
        }
        Ok((cluster_events, inconsistencies))
    }
}

/// A batch whose hardware read has started.
///
/// Dropped before [`InFlightBatch::commit`], it commits the batch with every
/// target ambiguous: the relays were switched, so the operations are
/// charged and the record is kept, but no cell is resolved.
struct InFlightBatch<'a> {
    state: &'a RwLock<SystemState>,
    plan: relay::BatchPlan,
    started_at: DateTime<Utc>,
    clock: Instant,
    committed: bool,
}

impl<'a> InFlightBatch<'a> {
    fn new(state: &'a RwLock<SystemState>, plan: relay::BatchPlan) -> Self {
        Self { state, plan, started_at: Utc::now(), clock: Instant::now(), committed: false }
    }

    fn commit(&mut self, state: &mut SystemState, readings: Vec<Reading>) -> TestRecord {
        self.committed = true;
        state.relay.commit_batch(self.plan.clone(), readings, self.started_at, self.clock.elapsed()).clone()
    }
}

impl Drop for InFlightBatch<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        tracing::warn!(
            source = %self.plan.source,
            targets = self.plan.targets.len(),
            ops = self.plan.cost,
            "batch abandoned during read; committed as ambiguous"
        );
        let readings = vec![Reading::Ambiguous; self.plan.targets.len()];
        let lock = self.state;
        let mut state = lock.write();
        let record = self.commit(&mut state, readings);
        if let Err(e) = state.ingest(&record) {
            tracing::warn!(test = %record.id, error = %e, "abandoned batch not ingested");
        }
    }
}

fn check_wiring(config: &SystemConfig, truth: Option<&GroundTruth>) -> Result<()> {
    match truth {
        Some(t) if t.total_points() != config.total_points => Err(Error::InvalidConfiguration(format!(
            "probe wiring has {} points, configuration has {}",
            t.total_points(),
            config.total_points
        ))),
        _ => Ok(()),
    }
}

/// The primary entry point. A `TestSystem` owns the discovered knowledge
/// for one set of test points and drives a probe to extend it.
pub struct TestSystem<P: ContinuityProbe = SimulatedProbe> {
    config: SystemConfig,
    probe: P,
    state: RwLock<SystemState>,
    gate: SessionGate,
}

impl TestSystem<SimulatedProbe> {
    /// Simulated system with wiring drawn from `config.distribution`.
    pub fn simulated(config: SystemConfig) -> Result<Self> {
        config.validate()?;
        let probe = SimulatedProbe::generate(config.total_points, config.distribution.clone(), config.seed)?;
        Self::with_probe(config, probe)
    }

    /// Simulated system over fixed wiring. `config.seed` seeds later resets.
    pub fn with_wiring(config: SystemConfig, truth: GroundTruth) -> Result<Self> {
        let mut probe = SimulatedProbe::new(truth).with_distribution(config.distribution.clone());
        if let Some(seed) = config.seed {
            probe = probe.with_seed(seed);
        }
        Self::with_probe(config, probe)
    }
}

impl<P: ContinuityProbe> TestSystem<P> {
    /// Create a system over any probe.
    pub fn with_probe(config: SystemConfig, probe: P) -> Result<Self> {
        config.validate()?;
        let truth = probe.ground_truth();
        check_wiring(&config, truth.as_deref())?;
        tracing::info!(
            total_points = config.total_points,
            ceiling = config.max_relay_operations,
            relay_cost = ?config.relay_cost,
            ground_truth = truth.is_some(),
            "test system ready"
        );
        Ok(Self {
            state: RwLock::new(SystemState::fresh(&config, truth)),
            config,
            probe,
            gate: SessionGate::new(),
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Access the probe (for advanced use).
    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn total_points(&self) -> u32 {
        self.config.total_points
    }

    /// Whether a batch, planned session or reset is running.
    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    // ------------------------------------------------------------------------
    // Mutating operations
    // ------------------------------------------------------------------------

    /// `ExecuteBatch`: energize `source` and read `targets`, or every pair of
    /// `source` still Unknown when `targets` is `None`.
    pub async fn execute_batch(&self, source: PointId, targets: Option<Vec<PointId>>) -> Result<BatchReport> {
        let session = self.gate.try_acquire(SessionKind::Batch)?;
        let targets = match targets {
            Some(targets) => targets,
            None => self.state.read().relations.unresolved_for(source)?.collect(),
        };
        self.run_batch(&session, source, targets).await
    }

    /// `RunPlannedSession`: let the batch planner pick batches until it
    /// converges or runs out of budget or rounds.
    pub async fn run_planned_session(&self, config: SessionConfig) -> Result<SessionSummary> {
        let mut planner = planner::BatchPlanner::new(config)?;
        let session = self.gate.try_acquire(SessionKind::Planned)?;
        let clock = Instant::now();

        let ops_before = {
            let mut state = self.state.write();
            if let Some(ceiling) = planner.config().max_relay_operations {
                state.relay.set_ceiling(ceiling);
            }
            state.relay.used()
        };
        tracing::info!(
            session = %session.id(),
            max_rounds = planner.config().max_rounds,
            detection_target = planner.config().detection_target,
            accuracy_target = planner.config().accuracy_target,
            "planned session started"
        );

        let mut tests = Vec::new();
        let mut ambiguous_readings = 0u64;
        while !planner.is_terminal() {
            let request = {
                let state = self.state.read();
                planner.plan(&state.relations, &state.clusters, state.relay.affordable_targets())
            };
            let Some(request) = request else { break };

            match self.run_batch(&session, request.source, request.targets).await {
                Ok(report) => {
                    ambiguous_readings += report.record.ambiguous_count() as u64;
                    tests.push(report.record.id);
                    planner.on_executed();
                }
                Err(Error::RelayBudgetExceeded { .. }) => {
                    planner.on_budget_exceeded();
                    continue;
                }
                Err(e) => return Err(e),
            }
            planner.on_ingested(&self.metrics());
        }

        let termination = planner.finish().unwrap_or(Termination::Converged);
        let (metrics, ops_after) = {
            let state = self.state.read();
            (state.metrics(), state.relay.used())
        };
        let summary = SessionSummary {
            termination,
            final_state: planner.state(),
            rounds_run: planner.rounds(),
            relay_operations_used: ops_after.saturating_sub(ops_before),
            ambiguous_readings,
            tests,
            metrics,
            elapsed_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        tracing::info!(
            session = %session.id(),
            termination = ?summary.termination,
            rounds = summary.rounds_run,
            ops = summary.relay_operations_used,
            detection_rate = summary.metrics.detection_rate,
            accuracy_rate = ?summary.metrics.accuracy_rate,
            "planned session finished"
        );
        Ok(summary)
    }

    /// `Reset`: draw new wiring (simulation only) and forget everything
    /// discovered, including the relay counters and the history.
    pub async fn reset(&self, distribution: Option<ClusterDistribution>) -> Result<ResetReport> {
        let session = self.gate.try_acquire(SessionKind::Reset)?;
        let ground_truth = match self.probe.rewire(distribution).await? {
            Some(truth) => Some(truth),
            None => self.probe.ground_truth(),
        };
        check_wiring(&self.config, ground_truth.as_deref())?;
        *self.state.write() = SystemState::fresh(&self.config, ground_truth.clone());
        tracing::info!(
            session = %session.id(),
            total_points = self.config.total_points,
            real_clusters = ground_truth.as_deref().map(|t| t.real_clusters().count()),
            "test system reset"
        );
        Ok(ResetReport { total_points: self.config.total_points, ground_truth })
    }

    /// Plan under a read guard, read with no lock held, commit under one write guard.
    ///
    /// Once the probe has been called the batch is always committed: if this
    /// future is dropped mid-read, [`InFlightBatch`] records it as ambiguous.
    async fn run_batch(&self, session: &SessionGuard<'_>, source: PointId, targets: Vec<PointId>) -> Result<BatchReport> {
        let plan = self.state.read().relay.plan_batch(source, targets)?;
        let (source, targets) = (plan.source, plan.targets.clone());

        let mut in_flight = InFlightBatch::new(&self.state, plan);
        let raw = self.probe.read(source, &targets).await;
        let readings = probe::align_readings(source, targets.len(), raw);

        let mut guard = self.state.write();
        let record = in_flight.commit(&mut guard, readings);
        let (cluster_events, inconsistencies) = guard.ingest(&record)?;
        drop(guard);

        tracing::debug!(
            session = %session.id(),
            test = %record.id,
            source = %record.source,
            targets = record.targets.len(),
            ops = record.relay_operations,
            conducting = record.conducting_targets().count(),
            ambiguous = record.ambiguous_count(),
            cluster_events = cluster_events.len(),
            "batch ingested"
        );
        Ok(BatchReport { record, cluster_events, inconsistencies })
    }

    // ------------------------------------------------------------------------
    // Queries (never take the session gate)
    // ------------------------------------------------------------------------

    /// `QueryPointState`: one point, or every point when `point` is `None`.
    pub fn point_state(&self, point: Option<PointId>) -> Result<Vec<PointState>> {
        let state = self.state.read();
        let describe = |id: PointId| -> Result<PointState> {
            Ok(PointState { id, relay: state.relay.relay_state(id)?, cluster: state.clusters.cluster_of(id) })
        };
        match point {
            Some(id) => Ok(vec![describe(id)?]),
            None => (0..self.config.total_points).map(|i| describe(PointId(i))).collect(),
        }
    }

    /// `QueryClusters`: the discovered partition, ordered by representative.
    pub fn clusters(&self) -> Vec<Cluster> {
        self.state.read().clusters.list()
    }

    /// `QueryMetrics`.
    pub fn metrics(&self) -> Metrics {
        self.state.read().metrics()
    }

    /// `CompareToGroundTruth`; `None` when the probe has no ground truth.
    pub fn compare_to_ground_truth(&self) -> Option<ClusterComparison> {
        let state = self.state.read();
        let truth = state.ground_truth.as_deref()?;
        Some(state.clusters.compare_to_ground_truth(truth))
    }

    /// Cell-level comparison against the ground truth.
    pub fn compare_pairs(&self) -> Option<PairComparison> {
        let state = self.state.read();
        let truth = state.ground_truth.as_deref()?;
        Some(metrics::compare_pairs(&state.relations, truth))
    }

    pub fn relation(&self, i: PointId, j: PointId) -> Result<RelationState> {
        self.state.read().relations.get(i, j)
    }

    pub fn point_relations(&self, point: PointId) -> Result<PointRelations> {
        self.state.read().relations.relations_of(point)
    }

    pub fn relation_summary(&self) -> RelationSummary {
        self.state.read().relations.summary()
    }

    pub fn relay_stats(&self) -> RelayStats {
        self.state.read().relay.stats()
    }

    /// Committed test records, oldest first.
    pub fn history(&self) -> Vec<TestRecord> {
        self.state.read().relay.history().to_vec()
    }

    /// The wiring metrics are scored against, if known.
    pub fn ground_truth(&self) -> Option<Arc<GroundTruth>> {
        self.state.read().ground_truth.clone()
    }

    /// Write status, clusters, metrics and history as one JSON document.
    pub fn export_json(&self, writer: &mut dyn Write) -> Result<()> {
        let state = self.state.read();
        let doc = export::ExportDocument {
            exported_at: Utc::now(),
            config: &self.config,
            relay: state.relay.stats(),
            relations: state.relations.summary(),
            metrics: state.metrics(),
            ground_truth_clusters: state.ground_truth.as_deref().map(|t| t.real_clusters().collect()),
            discovered_clusters: state.clusters.list(),
            history: state.relay.history(),
        };
        export::write_json(&doc, writer)
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid point {point}: expected an id in [0, {total})")]
    InvalidPoint { point: u32, total: u32 },

    #[error("Invalid pair: point {point} has no relation with itself")]
    SelfPair { point: u32 },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Relay budget exceeded: batch needs {required} operations, {used} of {ceiling} already used")]
    RelayBudgetExceeded { required: u64, used: u64, ceiling: u64 },

    #[error("Empty batch: source {point} has no target left to read")]
    EmptyBatch { point: u32 },

    #[error("Busy: session {holder} is still running")]
    Busy { holder: u64 },

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
