//! Property tests for the knowledge invariants: symmetry, monotonicity,
//! idempotence, merge transitivity, and non-decreasing detection rate.
//!
//! The store and the cluster engine are driven directly; the batch and
//! session properties run a `TestSystem` on a current-thread runtime.

use std::collections::{BTreeMap, HashMap};

use proptest::collection::vec;
use proptest::prelude::*;
use relay_graph::cluster::ClusterEngine;
use relay_graph::model::Relation;
use relay_graph::relations::RelationStore;
use relay_graph::{
    ClusterDistribution, Error, MatchStatus, PointId, RelationState, SessionConfig, SystemConfig,
    TestSystem, Termination,
};

const N: u32 = 12;

fn p(i: u32) -> PointId {
    PointId(i)
}

fn relation(conducting: bool) -> Relation {
    if conducting { Relation::Conducting } else { Relation::NonConducting }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

fn dense_wiring(total: u32, seed: u64) -> SystemConfig {
    SystemConfig {
        seed: Some(seed),
        distribution: ClusterDistribution::Shares(BTreeMap::from([(2, 0.3), (3, 0.3)])),
        ..SystemConfig::with_points(total)
    }
}

/// Connected components of the conducting edges, by naive label propagation.
fn components(total: u32, edges: &[(u32, u32)]) -> Vec<u32> {
    let mut label: Vec<u32> = (0..total).collect();
    loop {
        let mut changed = false;
        for &(a, b) in edges {
            let low = label[a as usize].min(label[b as usize]);
            for end in [a, b] {
                if label[end as usize] != low {
                    label[end as usize] = low;
                    changed = true;
                }
            }
        }
        if !changed {
            return label;
        }
    }
}

proptest! {
    #[test]
    fn prop_store_is_symmetric_and_monotonic(ops in vec((0..N, 0..N, any::<bool>()), 0..80)) {
        let mut store = RelationStore::new(N);
        let mut first: HashMap<(u32, u32), Relation> = HashMap::new();
        let mut last_rate = 0.0;

        for (i, j, conducting) in ops {
            if i == j {
                prop_assert!(store.apply(p(i), p(j), relation(conducting)).is_err());
                continue;
            }
            store.apply(p(i), p(j), relation(conducting)).unwrap();
            first.entry((i.min(j), i.max(j))).or_insert(relation(conducting));

            let rate = store.detection_rate();
            prop_assert!(rate >= last_rate);
            last_rate = rate;

            for (&(a, b), &rel) in &first {
                prop_assert_eq!(store.get(p(a), p(b)).unwrap(), RelationState::from(rel));
            }
        }

        for a in 0..N {
            for b in 0..N {
                if a == b {
                    continue;
                }
                let ab = store.get(p(a), p(b)).unwrap();
                prop_assert_eq!(ab, store.get(p(b), p(a)).unwrap());
                let expected = first.get(&(a.min(b), a.max(b))).copied().map_or(RelationState::Unknown, RelationState::from);
                prop_assert_eq!(ab, expected);
            }
        }
    }

    #[test]
    fn prop_apply_is_idempotent(ops in vec((0..N, 0..N, any::<bool>()), 0..60)) {
        let mut once = RelationStore::new(N);
        let mut twice = RelationStore::new(N);
        for (i, j, conducting) in ops {
            if i == j {
                continue;
            }
            once.apply(p(i), p(j), relation(conducting)).unwrap();
            twice.apply(p(i), p(j), relation(conducting)).unwrap();
            twice.apply(p(i), p(j), relation(conducting)).unwrap();
        }
        prop_assert_eq!(once.summary(), twice.summary());
        prop_assert_eq!(once.probed_count(), twice.probed_count());
        for a in 0..N {
            for b in (a + 1)..N {
                prop_assert_eq!(once.get(p(a), p(b)).unwrap(), twice.get(p(a), p(b)).unwrap());
            }
        }
    }

    #[test]
    fn prop_merges_are_transitive(edges in vec((0..N, 0..N), 0..30)) {
        let edges: Vec<(u32, u32)> = edges.into_iter().filter(|(a, b)| a != b).collect();
        let mut engine = ClusterEngine::new(N);
        for &(a, b) in &edges {
            engine.on_conducting(p(a), p(b)).unwrap();
        }

        let label = components(N, &edges);
        let touched: Vec<bool> = (0..N).map(|x| edges.iter().any(|&(a, b)| a == x || b == x)).collect();
        for a in 0..N {
            prop_assert_eq!(engine.is_clustered(p(a)), touched[a as usize]);
            if touched[a as usize] {
                // Representative is the lowest member of the component.
                prop_assert_eq!(engine.cluster_of(p(a)), Some(p(label[a as usize])));
            }
            for b in 0..N {
                let connected = a != b && touched[a as usize] && label[a as usize] == label[b as usize];
                prop_assert_eq!(engine.same_cluster(p(a), p(b)), connected || (a == b && touched[a as usize]));
            }
        }
        let clustered: usize = engine.list().iter().map(|c| c.len()).sum();
        prop_assert_eq!(clustered, engine.clustered_points());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_batches_only_confirm_real_wiring(
        seed in any::<u64>(),
        batches in vec((0u32..25, vec(0u32..25, 1..8)), 1..15),
    ) {
        runtime().block_on(async {
            let system = TestSystem::simulated(dense_wiring(25, seed)).unwrap();
            let mut last_rate = 0.0;
            for (source, targets) in batches {
                let targets = targets.into_iter().map(PointId).collect();
                match system.execute_batch(p(source), Some(targets)).await {
                    Ok(_) | Err(Error::EmptyBatch { .. }) => {}
                    Err(e) => panic!("unexpected batch error: {e}"),
                }
                let rate = system.metrics().detection_rate;
                assert!(rate >= last_rate);
                last_rate = rate;
            }

            let pairs = system.compare_pairs().unwrap();
            assert_eq!(pairs.false_positive + pairs.false_negative, 0);
            let cmp = system.compare_to_ground_truth().unwrap();
            assert!(cmp.matches.iter().all(|m| m.status != MatchStatus::Spurious));
        });
    }

    #[test]
    fn prop_planned_session_finds_every_cluster(seed in any::<u64>(), total in 5u32..30) {
        runtime().block_on(async {
            let system = TestSystem::simulated(dense_wiring(total, seed)).unwrap();
            let summary = system.run_planned_session(SessionConfig::default()).await.unwrap();

            assert_eq!(summary.termination, Termination::Converged);
            assert_eq!(summary.metrics.accuracy_rate, Some(100.0));

            let reads: usize = system.history().iter().map(|r| r.targets.len()).sum();
            let resolved = system.relation_summary();
            assert_eq!(reads as u64, resolved.conducting_pairs + resolved.non_conducting_pairs);
        });
    }
}
