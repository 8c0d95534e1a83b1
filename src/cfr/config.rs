//! Configuration for the training engine and executors.
//!
//! Construction-time validation lives here: invalid player counts, invalid
//! depth bounds, and mismatched persistence flags all fail loudly before any
//! training starts — they are never silently defaulted.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for a training [`crate::cfr::engine::Engine`].
///
/// # Example
/// ```
/// use cfr_engine::cfr::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert!(config.lock_player_nodes); // safe for concurrent training
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Lock each player node for the duration of a visit.
    ///
    /// Required whenever more than one engine shares a node tree. Disabling
    /// it is a correctness precondition on the caller — valid only for
    /// genuinely single-threaded training — not an optimization the engine
    /// can verify.
    pub lock_player_nodes: bool,

    /// Maintain the `visits` counter and `real_weight_sum` on each player
    /// node in addition to regrets and strategy weights.
    ///
    /// Must agree with the persistence loader's flag, or loading would
    /// silently misinterpret a differently-shaped weights file; the
    /// executors validate the pair at construction.
    pub update_visits_and_weight: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_player_nodes: true,
            update_visits_and_weight: false,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for single-threaded training: no node locking.
    pub fn single_threaded() -> Self {
        Self {
            lock_player_nodes: false,
            update_visits_and_weight: false,
        }
    }

    /// Builder method: set whether player nodes are locked per visit.
    pub fn with_node_locking(mut self, enable: bool) -> Self {
        self.lock_player_nodes = enable;
        self
    }

    /// Builder method: set whether visits and realization weight are
    /// tracked.
    pub fn with_visit_tracking(mut self, enable: bool) -> Self {
        self.update_visits_and_weight = enable;
        self
    }
}

/// Errors raised when assembling an engine or executor.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Games must have at least two players.
    #[error("game must have more than one player, got {0}")]
    InvalidPlayerCount(usize),

    /// The declared depth bound must be positive.
    #[error("game must declare a positive maximum depth")]
    InvalidMaxDepth,

    /// A cyclic executor needs at least one step game.
    #[error("cyclic executor needs at least one step")]
    NoSteps,

    /// Node locking was disabled for a configuration with more than one
    /// worker thread. Lock-free training is a single-thread-only
    /// correctness precondition.
    #[error("node locking must stay enabled when training with {threads} threads")]
    LockingRequired {
        /// The requested worker count.
        threads: usize,
    },

    /// A cyclic utility link points at a step index that does not exist.
    #[error("cyclic link references unknown step {0}")]
    UnknownStep(usize),

    /// The engine's visit-tracking flag disagrees with the loader's.
    #[error(
        "visit tracking mismatch: engine {engine}, loader {loader} — \
         the weights file would be misread"
    )]
    VisitTrackingMismatch {
        /// Engine-side `update_visits_and_weight`.
        engine: bool,
        /// Loader-side tracking flag.
        loader: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_locks_nodes() {
        let config = EngineConfig::default();
        assert!(config.lock_player_nodes);
        assert!(!config.update_visits_and_weight);
    }

    #[test]
    fn test_builder_methods() {
        let config = EngineConfig::new()
            .with_node_locking(false)
            .with_visit_tracking(true);
        assert!(!config.lock_player_nodes);
        assert!(config.update_visits_and_weight);
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = EngineConfig::default().with_visit_tracking(true);
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.lock_player_nodes, back.lock_player_nodes);
        assert_eq!(config.update_visits_and_weight, back.update_visits_and_weight);
    }
}
