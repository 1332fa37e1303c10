//! Simulated relay matrix.
//!
//! Reads conductivity straight from a [`GroundTruth`]. Individual pairs
//! can be forced to a fixed reading to imitate flaky contacts.
//!
//! ## Limitations
//!
//! - Latency is only simulated with the `latency` feature; otherwise reads
//!   return immediately.
//! - Overrides apply to the pair, whichever end is the source.

use std::sync::Arc;
#[cfg(feature = "latency")]
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::ContinuityProbe;
use crate::ground_truth::{ClusterDistribution, GroundTruth};
use crate::model::{PairKey, PointId, Reading};
use crate::{Error, Result};

pub struct SimulatedProbe {
    wiring: RwLock<Arc<GroundTruth>>,
    distribution: RwLock<ClusterDistribution>,
    rng: Mutex<StdRng>,
    overrides: RwLock<HashMap<PairKey, Reading>>,
    #[cfg(feature = "latency")]
    switch_delay: Duration,
}

impl SimulatedProbe {
    /// Probe over fixed wiring. `rewire` draws with the default distribution.
    pub fn new(truth: GroundTruth) -> Self {
        Self {
            wiring: RwLock::new(Arc::new(truth)),
            distribution: RwLock::new(ClusterDistribution::default()),
            rng: Mutex::new(StdRng::from_entropy()),
            overrides: RwLock::new(HashMap::new()),
            #[cfg(feature = "latency")]
            switch_delay: Duration::ZERO,
        }
    }

    /// Probe over freshly drawn wiring. A seed makes every draw reproducible.
    pub fn generate(total: u32, distribution: ClusterDistribution, seed: Option<u64>) -> Result<Self> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let truth = GroundTruth::generate(total, &distribution, &mut rng)?;
        Ok(Self {
            wiring: RwLock::new(Arc::new(truth)),
            distribution: RwLock::new(distribution),
            rng: Mutex::new(rng),
            overrides: RwLock::new(HashMap::new()),
            #[cfg(feature = "latency")]
            switch_delay: Duration::ZERO,
        })
    }

    /// Distribution used by later `rewire` calls that do not name one.
    pub fn with_distribution(mut self, distribution: ClusterDistribution) -> Self {
        *self.distribution.get_mut() = distribution;
        self
    }

    /// Make later `rewire` draws reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        *self.rng.get_mut() = StdRng::seed_from_u64(seed);
        self
    }

    /// Sleep this long before every read.
    #[cfg(feature = "latency")]
    pub fn with_switch_delay(mut self, delay: Duration) -> Self {
        self.switch_delay = delay;
        self
    }

    /// Force every future read of `(a, b)` to `reading`.
    pub fn override_pair(&self, a: PointId, b: PointId, reading: Reading) -> Result<()> {
        let key = PairKey::new(a, b).ok_or(Error::SelfPair { point: a.0 })?;
        self.overrides.write().insert(key, reading);
        Ok(())
    }

    pub fn clear_overrides(&self) {
        self.overrides.write().clear();
    }

    pub fn wiring(&self) -> Arc<GroundTruth> {
        Arc::clone(&self.wiring.read())
    }
}

#[async_trait]
impl ContinuityProbe for SimulatedProbe {
    async fn read(&self, source: PointId, targets: &[PointId]) -> Result<Vec<Reading>> {
        #[cfg(feature = "latency")]
        if !self.switch_delay.is_zero() {
            tokio::time::sleep(self.switch_delay).await;
        }

        let wiring = self.wiring();
        let total = wiring.total_points();
        let overrides = self.overrides.read();
        source.check(total).map_err(|e| Error::Hardware(e.to_string()))?;
        targets
            .iter()
            .map(|&t| {
                t.check(total).map_err(|e| Error::Hardware(e.to_string()))?;
                let forced = PairKey::new(source, t).and_then(|key| overrides.get(&key).copied());
                Ok(forced.unwrap_or_else(|| Reading::from(t != source && wiring.conducts(source, t))))
            })
            .collect()
    }

    fn ground_truth(&self) -> Option<Arc<GroundTruth>> {
        Some(self.wiring())
    }

    async fn rewire(&self, distribution: Option<ClusterDistribution>) -> Result<Option<Arc<GroundTruth>>> {
        let total = self.wiring.read().total_points();
        let truth = {
            let mut current = self.distribution.write();
            let distribution = distribution.unwrap_or_else(|| current.clone());
            let mut rng = self.rng.lock();
            let truth = GroundTruth::generate(total, &distribution, &mut *rng)?;
            *current = distribution;
            Arc::new(truth)
        };
        *self.wiring.write() = Arc::clone(&truth);
        self.overrides.write().clear();
        tracing::info!(total, real_clusters = truth.real_clusters().count(), "simulated wiring regenerated");
        Ok(Some(truth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u32]) -> Vec<PointId> {
        raw.iter().copied().map(PointId).collect()
    }

    #[tokio::test]
    async fn test_reads_follow_wiring() {
        let probe = SimulatedProbe::new(GroundTruth::from_clusters(10, [vec![0, 1, 2]]).unwrap());
        let readings = probe.read(PointId(0), &ids(&[1, 2, 3, 4])).await.unwrap();
        assert_eq!(
            readings,
            vec![Reading::Conducting, Reading::Conducting, Reading::NonConducting, Reading::NonConducting]
        );
    }

    #[tokio::test]
    async fn test_override_and_invalid_ids() {
        let probe = SimulatedProbe::new(GroundTruth::from_clusters(4, [vec![0, 1]]).unwrap());
        probe.override_pair(PointId(1), PointId(0), Reading::Ambiguous).unwrap();
        let readings = probe.read(PointId(0), &ids(&[1, 2])).await.unwrap();
        assert_eq!(readings, vec![Reading::Ambiguous, Reading::NonConducting]);

        assert!(matches!(probe.read(PointId(0), &ids(&[9])).await, Err(Error::Hardware(_))));
    }

    #[tokio::test]
    async fn test_rewire_is_seeded() {
        let a = SimulatedProbe::generate(300, ClusterDistribution::default(), Some(9)).unwrap();
        let b = SimulatedProbe::generate(300, ClusterDistribution::default(), Some(9)).unwrap();
        assert_eq!(a.wiring(), b.wiring());

        let ra = a.rewire(None).await.unwrap().unwrap();
        let rb = b.rewire(None).await.unwrap().unwrap();
        assert_eq!(ra, rb);
        assert_eq!(a.ground_truth().unwrap(), ra);
    }

    #[tokio::test]
    async fn test_fixed_wiring_rewires_from_seed() {
        let fixed = || GroundTruth::from_clusters(200, [vec![0, 1]]).unwrap();
        let a = SimulatedProbe::new(fixed()).with_seed(5);
        let b = SimulatedProbe::new(fixed()).with_seed(5);

        let ra = a.rewire(None).await.unwrap().unwrap();
        let rb = b.rewire(None).await.unwrap().unwrap();
        assert_eq!(ra, rb);
    }
}
