//! Pseudo-random values for Monte Carlo draws
//!
//! Every random choice a batch makes goes through one `PvalStore`, keyed by
//! draw name (usually a model) and a key within that draw. An on-demand store
//! samples lazily, remembers what it handed out, and can be locked so a second
//! pass (the historical-climate counterfactual) sees exactly the same values.
//! A locked store never creates a key.
//!
//! Seeds are captured explicitly and stored rather than re-seeding a shared
//! generator, so the record written by [`PvalStore::write`] is enough to replay
//! a batch.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use chrono::Utc;
use log::debug;
use rand::distr::Open01;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::PvalError;

/// Quantile of the median (point estimate) run
pub const MEDIAN: f64 = 0.5;

/// Store of quantiles and seeds for one batch
#[derive(Debug)]
pub enum PvalStore {
    /// Every quantile request returns the same value
    Constant(f64),
    OnDemand(OnDemandPvals),
}

/// Lazily sampled values, memoized per draw and key
#[derive(Debug)]
pub struct OnDemandPvals {
    rng: StdRng,
    draws: BTreeMap<String, PvalDictionary>,
    locked: bool,
}

/// Values of one draw
#[derive(Debug, Clone, Default)]
pub struct PvalDictionary {
    quantiles: BTreeMap<String, f64>,
    seeds: BTreeMap<String, Vec<u64>>,
    /// Replay position of `next_seed` per key, used once locked
    cursors: HashMap<String, usize>,
    locked: bool,
}

/// Serialized draw history of a store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PvalRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<f64>,
    #[serde(default)]
    pub draws: BTreeMap<String, DrawRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawRecord {
    #[serde(default)]
    pub quantiles: BTreeMap<String, f64>,
    #[serde(default)]
    pub seeds: BTreeMap<String, Vec<u64>>,
}

impl PvalStore {
    /// Constant store at the median
    pub fn median() -> Self {
        PvalStore::Constant(MEDIAN)
    }

    pub fn constant(quantile: f64) -> Self {
        PvalStore::Constant(quantile)
    }

    /// On-demand store whose quantiles come from a generator seeded with `seed`
    pub fn on_demand(seed: u64) -> Self {
        PvalStore::OnDemand(OnDemandPvals {
            rng: StdRng::seed_from_u64(seed),
            draws: BTreeMap::new(),
            locked: false,
        })
    }

    /// The fixed quantile of a constant store
    pub fn constant_quantile(&self) -> Option<f64> {
        match self {
            PvalStore::Constant(quantile) => Some(*quantile),
            PvalStore::OnDemand(_) => None,
        }
    }

    /// Quantile in (0, 1) for `key` of `draw`
    pub fn get_quantile(&mut self, draw: &str, key: &str) -> Result<f64, PvalError> {
        match self {
            PvalStore::Constant(quantile) => Ok(*quantile),
            PvalStore::OnDemand(store) => {
                let OnDemandPvals { rng, draws, locked } = store;
                dictionary(draws, *locked, draw, key)?.get_quantile(draw, key, rng)
            }
        }
    }

    /// Reproducible seed for `key` of `draw`
    ///
    /// The first call captures a seed; every later call, locked or not,
    /// returns that first capture.
    pub fn get_seed(&mut self, draw: &str, key: &str) -> Result<u64, PvalError> {
        match self {
            PvalStore::Constant(quantile) => Ok(constant_seed(*quantile)),
            PvalStore::OnDemand(store) => {
                let OnDemandPvals { rng, draws, locked } = store;
                dictionary(draws, *locked, draw, key)?.get_seed(draw, key, rng)
            }
        }
    }

    /// A fresh seed for each call while unlocked, replayed in order once locked
    ///
    /// Used where one key needs several independent captures (e.g. successive
    /// historical-climate shuffles).
    pub fn next_seed(&mut self, draw: &str, key: &str) -> Result<u64, PvalError> {
        match self {
            PvalStore::Constant(quantile) => Ok(constant_seed(*quantile)),
            PvalStore::OnDemand(store) => {
                let OnDemandPvals { rng, draws, locked } = store;
                dictionary(draws, *locked, draw, key)?.next_seed(draw, key, rng)
            }
        }
    }

    /// Freeze the store and every draw in it; idempotent
    pub fn lock(&mut self) {
        if let PvalStore::OnDemand(store) = self {
            if !store.locked {
                debug!("locking pval store with {} draws", store.draws.len());
            }
            store.locked = true;
            for dictionary in store.draws.values_mut() {
                dictionary.lock();
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        match self {
            PvalStore::Constant(_) => true,
            PvalStore::OnDemand(store) => store.locked,
        }
    }

    /// Full draw history
    pub fn serialize(&self) -> PvalRecord {
        match self {
            PvalStore::Constant(quantile) => PvalRecord {
                constant: Some(*quantile),
                draws: BTreeMap::new(),
            },
            PvalStore::OnDemand(store) => PvalRecord {
                constant: None,
                draws: store
                    .draws
                    .iter()
                    .map(|(name, dictionary)| {
                        (
                            name.clone(),
                            DrawRecord {
                                quantiles: dictionary.quantiles.clone(),
                                seeds: dictionary.seeds.clone(),
                            },
                        )
                    })
                    .collect(),
            },
        }
    }

    /// Locked store that replays a recorded history
    pub fn replay(record: PvalRecord) -> Self {
        if let Some(quantile) = record.constant {
            return PvalStore::Constant(quantile);
        }

        let draws = record
            .draws
            .into_iter()
            .map(|(name, draw)| {
                (
                    name,
                    PvalDictionary {
                        quantiles: draw.quantiles,
                        seeds: draw.seeds,
                        cursors: HashMap::new(),
                        locked: true,
                    },
                )
            })
            .collect();

        PvalStore::OnDemand(OnDemandPvals {
            rng: StdRng::seed_from_u64(0),
            draws,
            locked: true,
        })
    }

    /// Write the draw history as JSON
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), PvalError> {
        let json = serde_json::to_string_pretty(&self.serialize())?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a JSON draw history as a locked store
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, PvalError> {
        let json = fs::read_to_string(path)?;
        let record: PvalRecord = serde_json::from_str(&json)?;
        Ok(Self::replay(record))
    }
}

fn dictionary<'a>(
    draws: &'a mut BTreeMap<String, PvalDictionary>,
    locked: bool,
    draw: &str,
    key: &str,
) -> Result<&'a mut PvalDictionary, PvalError> {
    if !draws.contains_key(draw) {
        if locked {
            return Err(PvalError::UnknownKeyAfterLock {
                draw: draw.to_string(),
                key: key.to_string(),
            });
        }
        draws.insert(draw.to_string(), PvalDictionary::default());
    }
    draws
        .get_mut(draw)
        .ok_or_else(|| PvalError::UnknownKeyAfterLock {
            draw: draw.to_string(),
            key: key.to_string(),
        })
}

/// Seeds for constant stores derive from the quantile so median runs agree
fn constant_seed(quantile: f64) -> u64 {
    quantile.to_bits()
}

/// Wall-clock seconds in the high bits, generator bits below
///
/// Two captures in the same second still differ.
fn capture_seed(rng: &mut StdRng) -> u64 {
    let clock = Utc::now().timestamp().unsigned_abs();
    (clock << 32) ^ u64::from(rng.random::<u32>())
}

impl PvalDictionary {
    fn get_quantile(&mut self, draw: &str, key: &str, rng: &mut StdRng) -> Result<f64, PvalError> {
        if let Some(value) = self.quantiles.get(key) {
            return Ok(*value);
        }
        if self.locked {
            return Err(unknown(draw, key));
        }
        let value: f64 = rng.sample(Open01);
        self.quantiles.insert(key.to_string(), value);
        Ok(value)
    }

    fn get_seed(&mut self, draw: &str, key: &str, rng: &mut StdRng) -> Result<u64, PvalError> {
        if let Some(first) = self.seeds.get(key).and_then(|seeds| seeds.first()) {
            return Ok(*first);
        }
        if self.locked {
            return Err(unknown(draw, key));
        }
        let seed = capture_seed(rng);
        self.seeds.insert(key.to_string(), vec![seed]);
        Ok(seed)
    }

    fn next_seed(&mut self, draw: &str, key: &str, rng: &mut StdRng) -> Result<u64, PvalError> {
        if !self.locked {
            let seed = capture_seed(rng);
            self.seeds.entry(key.to_string()).or_default().push(seed);
            return Ok(seed);
        }

        let seeds = self.seeds.get(key).ok_or_else(|| unknown(draw, key))?;
        let cursor = self.cursors.entry(key.to_string()).or_insert(0);
        let seed = seeds.get(*cursor).copied().ok_or(PvalError::SeedsExhausted {
            draw: draw.to_string(),
            key: key.to_string(),
            captured: seeds.len(),
        })?;
        *cursor += 1;
        Ok(seed)
    }

    fn lock(&mut self) {
        if !self.locked {
            self.locked = true;
            self.cursors.clear();
        }
    }
}

fn unknown(draw: &str, key: &str) -> PvalError {
    PvalError::UnknownKeyAfterLock {
        draw: draw.to_string(),
        key: key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_store_ignores_keys() {
        let mut pvals = PvalStore::constant(0.25);
        assert_eq!(pvals.get_quantile("mortality", "tas").unwrap(), 0.25);
        assert_eq!(pvals.get_quantile("labor", "anything").unwrap(), 0.25);
        pvals.lock();
        assert_eq!(pvals.get_quantile("never-seen", "key").unwrap(), 0.25);
    }

    #[test]
    fn quantiles_are_memoized_and_open() {
        let mut pvals = PvalStore::on_demand(3);
        let first = pvals.get_quantile("mortality", "tas").unwrap();
        assert!(first > 0.0 && first < 1.0);
        assert_eq!(pvals.get_quantile("mortality", "tas").unwrap(), first);
        assert_ne!(pvals.get_quantile("mortality", "tas2").unwrap(), first);
    }

    #[test]
    fn same_seed_gives_same_quantiles() {
        let mut a = PvalStore::on_demand(99);
        let mut b = PvalStore::on_demand(99);
        for key in ["a", "b", "c"] {
            assert_eq!(
                a.get_quantile("draw", key).unwrap(),
                b.get_quantile("draw", key).unwrap()
            );
        }
    }

    #[test]
    fn replay_after_lock_is_identical() {
        let mut pvals = PvalStore::on_demand(5);
        let calls = [("mortality", "csvv"), ("labor", "csvv"), ("mortality", "tas")];

        let before: Vec<(f64, u64)> = calls
            .iter()
            .map(|(draw, key)| {
                (
                    pvals.get_quantile(draw, key).unwrap(),
                    pvals.get_seed(draw, key).unwrap(),
                )
            })
            .collect();

        pvals.lock();
        pvals.lock();

        let after: Vec<(f64, u64)> = calls
            .iter()
            .map(|(draw, key)| {
                (
                    pvals.get_quantile(draw, key).unwrap(),
                    pvals.get_seed(draw, key).unwrap(),
                )
            })
            .collect();

        assert_eq!(before, after);
    }

    #[test]
    fn unseen_key_after_lock_fails() {
        let mut pvals = PvalStore::on_demand(5);
        pvals.get_quantile("mortality", "tas").unwrap();
        pvals.lock();

        assert!(matches!(
            pvals.get_quantile("mortality", "tas2"),
            Err(PvalError::UnknownKeyAfterLock { .. })
        ));
        assert!(matches!(
            pvals.get_seed("mortality", "csvv"),
            Err(PvalError::UnknownKeyAfterLock { .. })
        ));
        assert!(matches!(
            pvals.get_quantile("labor", "tas"),
            Err(PvalError::UnknownKeyAfterLock { .. })
        ));
    }

    #[test]
    fn get_seed_returns_first_capture() {
        let mut pvals = PvalStore::on_demand(8);
        let first = pvals.get_seed("histclim", "years").unwrap();
        let extra = pvals.next_seed("histclim", "years").unwrap();
        assert_eq!(pvals.get_seed("histclim", "years").unwrap(), first);

        let record = pvals.serialize();
        assert_eq!(record.draws["histclim"].seeds["years"], vec![first, extra]);
    }

    #[test]
    fn next_seed_replays_in_capture_order() {
        let mut pvals = PvalStore::on_demand(8);
        let captured: Vec<u64> = (0..3)
            .map(|_| pvals.next_seed("histclim", "shuffle").unwrap())
            .collect();
        assert_ne!(captured[0], captured[1]);

        pvals.lock();
        let replayed: Vec<u64> = (0..3)
            .map(|_| pvals.next_seed("histclim", "shuffle").unwrap())
            .collect();
        assert_eq!(captured, replayed);
        assert!(matches!(
            pvals.next_seed("histclim", "shuffle"),
            Err(PvalError::SeedsExhausted { captured: 3, .. })
        ));
    }

    #[test]
    fn record_round_trips_through_file() {
        let mut pvals = PvalStore::on_demand(21);
        let q = pvals.get_quantile("mortality", "tas").unwrap();
        let s = pvals.get_seed("mortality", "csvv").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pvals.json");
        pvals.write(&path).unwrap();

        let mut replay = PvalStore::read(&path).unwrap();
        assert!(replay.is_locked());
        assert_eq!(replay.get_quantile("mortality", "tas").unwrap(), q);
        assert_eq!(replay.get_seed("mortality", "csvv").unwrap(), s);
        assert_eq!(replay.serialize(), pvals.serialize());
    }

    #[test]
    fn constant_record_replays_constant() {
        let record = PvalStore::constant(0.1).serialize();
        let mut replay = PvalStore::replay(record);
        assert_eq!(replay.get_quantile("x", "y").unwrap(), 0.1);
    }
}
