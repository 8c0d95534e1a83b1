//! Game-tree nodes and their accumulated training data.
//!
//! A game tree is made of three kinds of nodes:
//!
//! - **Chance**: a random event (card deal, die roll). Carries no data; the
//!   engine expects games to pre-sample chance outcomes once per iteration.
//! - **Player**: a decision point. Owns the cumulative regrets and strategy
//!   weights that the CFR engine trains, protected by a per-node lock so
//!   several engines can share one tree.
//! - **Terminal**: end of the game. Either carries the payoff vector
//!   directly or refers to a payoff computed elsewhere via a utility id
//!   (see [`crate::cfr::terminal::TerminalUtilReader`]).
//!
//! Nodes are created once when a game is built and shared between game
//! instances through [`NodeRef`] (an `Arc`), so "sharing" game instances used
//! by concurrent engines all mutate the same accumulators.

use parking_lot::Mutex;
use std::mem;
use std::sync::Arc;

use crate::cfr::game::GameError;
use crate::cfr::terminal::TerminalUtilReader;

/// Shared handle to a node. Clones refer to the same underlying node, which
/// is what allows multiple game instances to train one tree.
pub type NodeRef = Arc<Node>;

/// A node in the game tree.
#[derive(Debug)]
pub enum Node {
    /// A random event. The engine passes through chance nodes without
    /// touching any per-node state.
    Chance,
    /// A decision point owned by one player.
    Player(PlayerNode),
    /// A leaf with a payoff vector, direct or indirect.
    Terminal(TerminalNode),
}

impl Node {
    /// Create a chance node.
    pub fn chance() -> NodeRef {
        Arc::new(Node::Chance)
    }

    /// Create a player node with `num_actions` legal actions.
    pub fn player(player: usize, num_actions: usize) -> NodeRef {
        Arc::new(Node::Player(PlayerNode::new(player, num_actions)))
    }

    /// Create a terminal node with direct payoffs.
    pub fn terminal(payoffs: Vec<f64>) -> NodeRef {
        Arc::new(Node::Terminal(TerminalNode::with_payoffs(payoffs)))
    }

    /// Create a terminal node whose payoffs are resolved through a
    /// [`TerminalUtilReader`] under the given id.
    pub fn terminal_util(util_id: i32) -> NodeRef {
        Arc::new(Node::Terminal(TerminalNode::with_util_id(util_id)))
    }

    /// The player node inside this node, if it is one.
    pub fn as_player(&self) -> Option<&PlayerNode> {
        match self {
            Node::Player(p) => Some(p),
            _ => None,
        }
    }
}

/// Mutable training data of a player node.
///
/// These four fields are the only state the engine mutates during training;
/// they form the unit of synchronization between concurrent engines.
#[derive(Debug, Clone)]
pub struct PlayerState {
    /// Cumulative counterfactual regret per action.
    pub regret_sum: Vec<f64>,
    /// Cumulative strategy weight per action (for the average strategy).
    pub strat_sum: Vec<f64>,
    /// Number of completed visits to this node across all iterations.
    pub visits: u64,
    /// Running sum of the counterfactual weight seen by this node.
    pub real_weight_sum: f64,
}

/// A decision point in the game tree.
///
/// The action count is fixed at construction; `regret_sum` and `strat_sum`
/// always have exactly that length. All mutable state lives behind one
/// mutex, which the engine holds across a full visit to the node within one
/// iteration (first touch on the forward pass through the final regret
/// update on the backward pass).
#[derive(Debug)]
pub struct PlayerNode {
    player: usize,
    num_actions: usize,
    state: Mutex<PlayerState>,
}

impl PlayerNode {
    /// Create a player node for `player` with `num_actions` legal actions.
    ///
    /// # Panics
    /// Panics if `num_actions` is zero; a decision point without actions is
    /// malformed and rejected at construction rather than mid-iteration.
    pub fn new(player: usize, num_actions: usize) -> Self {
        assert!(num_actions > 0, "player node must have at least one action");
        Self {
            player,
            num_actions,
            state: Mutex::new(PlayerState {
                regret_sum: vec![0.0; num_actions],
                strat_sum: vec![0.0; num_actions],
                visits: 0,
                real_weight_sum: 0.0,
            }),
        }
    }

    /// Index of the player acting at this node.
    pub fn player(&self) -> usize {
        self.player
    }

    /// Number of legal actions at this node (fixed at construction).
    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    /// Acquire this node's lock without a guard.
    ///
    /// The engine holds node locks across loop steps of its flattened tree
    /// walk, which a scoped guard cannot express; the matching release is
    /// [`PlayerNode::release`] on the same thread.
    pub fn acquire(&self) {
        mem::forget(self.state.lock());
    }

    /// Release a lock previously taken with [`PlayerNode::acquire`].
    ///
    /// Must only be called by the thread that acquired the lock. The
    /// release is skipped when the lock is no longer held: after an
    /// emergency sweep (see [`PlayerNode::force_release`]) a surviving
    /// worker's paired release can find its lock already stolen, and
    /// unlocking an unlocked mutex would be undefined.
    pub fn release(&self) {
        if self.state.is_locked() {
            // Safety: pairs with the guard forgotten in `acquire`.
            unsafe { self.state.force_unlock() }
        }
    }

    /// Release this node's lock if held, regardless of holder.
    ///
    /// This exists solely for the executor failure path: when a training
    /// worker dies mid-iteration its held locks would deadlock the remaining
    /// workers, so the failing worker sweeps every player node through this
    /// method. Racing a healthy lock holder here is unsound; the executor
    /// only runs the sweep once training is being abandoned.
    ///
    /// Returns `true` if a lock was released.
    pub fn force_release(&self) -> bool {
        if self.state.is_locked() {
            // Safety: documented failure-recovery path only, see above.
            unsafe { self.state.force_unlock() }
            true
        } else {
            false
        }
    }

    /// Mutable access to the training data without taking the lock.
    ///
    /// # Safety
    /// The caller must either hold this node's lock via
    /// [`PlayerNode::acquire`], or be the only thread touching the tree
    /// (a single-threaded engine configured without node locking).
    pub unsafe fn state_raw(&self) -> &mut PlayerState {
        &mut *self.state.data_ptr()
    }

    /// Run `f` with the training data under the node lock.
    ///
    /// This is the safe accessor used outside the engine's hot loop:
    /// persistence, inspection, and tests.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut PlayerState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Whether this node's lock is currently held by some thread.
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    /// Current strategy from regret matching: proportional to positive
    /// regrets, uniform when no regret is positive.
    pub fn current_strategy(&self) -> Vec<f64> {
        self.with_state(|state| {
            let positive: Vec<f64> = state.regret_sum.iter().map(|&r| r.max(0.0)).collect();
            let sum: f64 = positive.iter().sum();
            if sum > 0.0 {
                positive.iter().map(|&r| r / sum).collect()
            } else {
                vec![1.0 / self.num_actions as f64; self.num_actions]
            }
        })
    }

    /// Average strategy over all iterations — the Nash equilibrium
    /// approximation CFR converges to.
    ///
    /// A node that has never accumulated strategy mass (never visited)
    /// reports the uniform distribution rather than dividing by zero.
    pub fn average_strategy(&self) -> Vec<f64> {
        self.with_state(|state| {
            let total: f64 = state.strat_sum.iter().sum();
            if total > 0.0 {
                state.strat_sum.iter().map(|&s| s / total).collect()
            } else {
                vec![1.0 / self.num_actions as f64; self.num_actions]
            }
        })
    }
}

/// A leaf of the game tree.
///
/// Either `payoffs` is present (direct payoffs, `util_id` is -1) or
/// `util_id` is non-negative and resolved through a [`TerminalUtilReader`]
/// at training time. The constructors make the invalid combination
/// (no payoffs, negative id) unrepresentable.
#[derive(Debug, Clone)]
pub struct TerminalNode {
    payoffs: Option<Vec<f64>>,
    util_id: i32,
}

impl TerminalNode {
    /// Terminal with direct payoffs, one entry per player.
    pub fn with_payoffs(payoffs: Vec<f64>) -> Self {
        Self {
            payoffs: Some(payoffs),
            util_id: -1,
        }
    }

    /// Terminal resolved through a utility reader under `util_id`.
    ///
    /// # Panics
    /// Panics if `util_id` is negative.
    pub fn with_util_id(util_id: i32) -> Self {
        assert!(util_id >= 0, "terminal utility id must be non-negative");
        Self {
            payoffs: None,
            util_id,
        }
    }

    /// Direct payoffs, if this terminal carries them.
    pub fn payoffs(&self) -> Option<&[f64]> {
        self.payoffs.as_deref()
    }

    /// Utility id, -1 when payoffs are direct.
    pub fn util_id(&self) -> i32 {
        self.util_id
    }

    /// Write this terminal's payoff vector into `dest`.
    ///
    /// Direct payoffs always win; the reader is only consulted for
    /// indirect terminals and is never invoked otherwise.
    pub fn resolve(
        &self,
        reader: Option<&dyn TerminalUtilReader>,
        dest: &mut [f64],
    ) -> Result<(), GameError> {
        if let Some(payoffs) = self.payoffs.as_deref() {
            let n = dest.len().min(payoffs.len());
            dest[..n].copy_from_slice(&payoffs[..n]);
            return Ok(());
        }
        match reader {
            Some(reader) => reader.read(self.util_id, dest),
            None => Err(GameError::UnresolvedTerminal {
                util_id: self.util_id,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_node_shapes() {
        let node = PlayerNode::new(1, 3);
        assert_eq!(node.player(), 1);
        assert_eq!(node.num_actions(), 3);
        node.with_state(|state| {
            assert_eq!(state.regret_sum.len(), state.strat_sum.len());
            assert_eq!(state.regret_sum.len(), 3);
            assert_eq!(state.visits, 0);
        });
    }

    #[test]
    #[should_panic]
    fn test_player_node_rejects_zero_actions() {
        PlayerNode::new(0, 0);
    }

    #[test]
    fn test_current_strategy_regret_matching() {
        let node = PlayerNode::new(0, 3);
        node.with_state(|state| {
            state.regret_sum[0] = 3.0;
            state.regret_sum[1] = -5.0;
            state.regret_sum[2] = 1.0;
        });
        let strategy = node.current_strategy();
        assert!((strategy[0] - 0.75).abs() < 1e-12);
        assert_eq!(strategy[1], 0.0);
        assert!((strategy[2] - 0.25).abs() < 1e-12);
        assert!((strategy.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_current_strategy_uniform_when_no_positive_regret() {
        let node = PlayerNode::new(0, 4);
        node.with_state(|state| {
            for r in state.regret_sum.iter_mut() {
                *r = -1.0;
            }
        });
        let strategy = node.current_strategy();
        for p in strategy {
            assert!((p - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn test_average_strategy_uniform_fallback() {
        let node = PlayerNode::new(0, 2);
        let strategy = node.average_strategy();
        assert_eq!(strategy, vec![0.5, 0.5]);

        node.with_state(|state| {
            state.strat_sum[0] = 3.0;
            state.strat_sum[1] = 1.0;
        });
        let strategy = node.average_strategy();
        assert!((strategy[0] - 0.75).abs() < 1e-12);
        assert!((strategy[1] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_manual_lock_roundtrip() {
        let node = PlayerNode::new(0, 2);
        assert!(!node.is_locked());
        node.acquire();
        assert!(node.is_locked());
        node.release();
        assert!(!node.is_locked());
    }

    #[test]
    fn test_force_release() {
        let node = PlayerNode::new(0, 2);
        assert!(!node.force_release());
        node.acquire();
        assert!(node.force_release());
        assert!(!node.is_locked());
    }

    #[test]
    fn test_terminal_direct_payoffs_never_consult_reader() {
        struct PanicReader;
        impl TerminalUtilReader for PanicReader {
            fn read(&self, _id: i32, _dest: &mut [f64]) -> Result<(), GameError> {
                panic!("reader must not be consulted for direct payoffs");
            }
        }

        let terminal = TerminalNode::with_payoffs(vec![1.5, -1.5]);
        assert_eq!(terminal.util_id(), -1);
        let mut dest = [0.0; 2];
        terminal.resolve(Some(&PanicReader), &mut dest).unwrap();
        assert_eq!(dest, [1.5, -1.5]);
    }

    #[test]
    fn test_terminal_indirect_invokes_reader_with_id() {
        struct EchoReader;
        impl TerminalUtilReader for EchoReader {
            fn read(&self, id: i32, dest: &mut [f64]) -> Result<(), GameError> {
                for (i, slot) in dest.iter_mut().enumerate() {
                    *slot = (id as f64) * 10.0 + i as f64;
                }
                Ok(())
            }
        }

        let terminal = TerminalNode::with_util_id(7);
        let mut dest = [0.0; 2];
        terminal.resolve(Some(&EchoReader), &mut dest).unwrap();
        assert_eq!(dest, [70.0, 71.0]);
    }

    #[test]
    fn test_terminal_indirect_without_reader_errors() {
        let terminal = TerminalNode::with_util_id(0);
        let mut dest = [0.0; 2];
        assert!(terminal.resolve(None, &mut dest).is_err());
    }

    #[test]
    #[should_panic]
    fn test_terminal_rejects_negative_util_id() {
        TerminalNode::with_util_id(-1);
    }
}
