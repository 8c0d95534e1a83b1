//! Running mean of per-iteration game utility.
//!
//! Every training iteration produces one utility vector (the resolved value
//! of the root for each player). Accumulating these across iterations gives
//! the mean game value, which is both a convergence signal and — through the
//! cyclic utility reader — an input to other games' terminal payoffs.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Snapshot of training progress: iteration count plus the utility sums it
/// covers. Independent of node weights, so it can be persisted and restored
/// alongside them to resume a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilityState {
    /// Number of iterations accumulated.
    pub iterations: u64,
    /// Per-player sum of iteration utilities.
    pub utility_sum: Vec<f64>,
}

impl UtilityState {
    /// Empty state for `num_players` players.
    pub fn new(num_players: usize) -> Self {
        Self {
            iterations: 0,
            utility_sum: vec![0.0; num_players],
        }
    }

    /// Mean utility per player; all zeros when nothing has been
    /// accumulated yet.
    pub fn mean(&self) -> Vec<f64> {
        if self.iterations == 0 {
            return vec![0.0; self.utility_sum.len()];
        }
        let n = self.iterations as f64;
        self.utility_sum.iter().map(|&sum| sum / n).collect()
    }
}

/// Accumulates per-iteration utility into a running mean.
///
/// This is the single-threaded variant; engines that share one accumulator
/// across worker threads use [`SharedUtilityManager`].
#[derive(Debug, Clone)]
pub struct UtilityManager {
    iterations: u64,
    utility_sum: Vec<f64>,
    mean: Vec<f64>,
}

impl UtilityManager {
    /// Create an empty accumulator for `num_players` players.
    pub fn new(num_players: usize) -> Self {
        Self {
            iterations: 0,
            utility_sum: vec![0.0; num_players],
            mean: vec![0.0; num_players],
        }
    }

    /// Fold one iteration's utility vector into the running mean.
    pub fn add_iter_util(&mut self, iter_util: &[f64]) {
        debug_assert_eq!(iter_util.len(), self.utility_sum.len());
        self.iterations += 1;
        let n = self.iterations as f64;
        for (i, &u) in iter_util.iter().enumerate() {
            self.utility_sum[i] += u;
            self.mean[i] = self.utility_sum[i] / n;
        }
    }

    /// Current mean utility per player.
    pub fn util(&self) -> &[f64] {
        &self.mean
    }

    /// Number of iterations accumulated so far.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Snapshot the accumulator.
    pub fn state(&self) -> UtilityState {
        UtilityState {
            iterations: self.iterations,
            utility_sum: self.utility_sum.clone(),
        }
    }

    /// Restore the accumulator from a snapshot.
    pub fn set_state(&mut self, state: UtilityState) {
        self.mean = state.mean();
        self.iterations = state.iterations;
        self.utility_sum = state.utility_sum;
    }
}

/// Mutex-wrapped [`UtilityManager`] for engines reporting concurrently.
///
/// Every mutating and reading operation takes the lock, so the running sum
/// can never tear under concurrent `add_iter_util` calls, and `read` hands
/// out a consistent copy of the mean without disturbing writers.
#[derive(Debug)]
pub struct SharedUtilityManager {
    inner: Mutex<UtilityManager>,
}

impl SharedUtilityManager {
    /// Create an empty shared accumulator for `num_players` players.
    pub fn new(num_players: usize) -> Self {
        Self {
            inner: Mutex::new(UtilityManager::new(num_players)),
        }
    }

    /// Fold one iteration's utility vector into the running mean.
    pub fn add_iter_util(&self, iter_util: &[f64]) {
        self.inner.lock().add_iter_util(iter_util);
    }

    /// Copy the current mean utility into `dest` (first `num_players`
    /// slots), without exposing the accumulator itself.
    pub fn read(&self, dest: &mut [f64]) {
        let inner = self.inner.lock();
        let mean = inner.util();
        let n = dest.len().min(mean.len());
        dest[..n].copy_from_slice(&mean[..n]);
    }

    /// Number of iterations accumulated so far.
    pub fn iterations(&self) -> u64 {
        self.inner.lock().iterations()
    }

    /// Snapshot the accumulator.
    pub fn state(&self) -> UtilityState {
        self.inner.lock().state()
    }

    /// Restore the accumulator from a snapshot.
    pub fn set_state(&self, state: UtilityState) {
        self.inner.lock().set_state(state);
    }
}
