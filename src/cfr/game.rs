//! Game protocol consumed by the training engine.
//!
//! The engine drives a game as a stateful sequence machine rather than
//! through immutable state transitions: the game keeps an internal cursor
//! into its tree, the engine asks for the node under the cursor, commits to
//! an action (or lets the game advance past a chance node), and later backs
//! the cursor up while unwinding. This keeps the per-iteration walk free of
//! allocation — the game owns whatever bookkeeping it needs and reuses it
//! every iteration.

use thiserror::Error;

use crate::cfr::node::NodeRef;

/// Errors raised when a game violates the engine's protocol mid-training.
///
/// These are "malformed game" conditions: they indicate a bug in a game
/// implementation (or a tree deeper than the game declared), not a
/// recoverable state. The engine aborts the iteration and surfaces them.
#[derive(Debug, Clone, Error)]
pub enum GameError {
    /// The game returned a node that cannot appear at the current position,
    /// e.g. a chance node where the engine committed to a player action.
    #[error("game returned an inconsistent node at depth {depth}")]
    InconsistentNode {
        /// Depth of the engine's cursor when the mismatch was observed.
        depth: usize,
    },

    /// `back()` was called with the cursor already at the root.
    #[error("back() called from the root of the game tree")]
    BackFromRoot,

    /// A terminal node carries neither direct payoffs nor a reader to
    /// resolve its utility id through.
    #[error("terminal node with utility id {util_id} has no reader to resolve it")]
    UnresolvedTerminal {
        /// The id the terminal wanted resolved.
        util_id: i32,
    },

    /// A terminal utility id does not exist in the configured reader.
    #[error("no terminal utility registered under id {util_id}")]
    UnknownUtilId {
        /// The unresolvable id.
        util_id: i32,
    },

    /// The game's tree is deeper than its declared `max_depth()`.
    ///
    /// Surfaced before any out-of-bounds access so an under-provisioned
    /// game fails deterministically instead of corrupting scratch state.
    #[error("game tree exceeds the declared maximum depth of {max_depth}")]
    MaxDepthExceeded {
        /// The depth bound the game declared at engine construction.
        max_depth: usize,
    },
}

/// A game the engine can train.
///
/// Implementations model one traversal position ("cursor") over a tree of
/// [`crate::cfr::node::Node`]s. The engine's contract:
///
/// 1. [`Game::on_iteration_start`] is called once per iteration. The game
///    resets its cursor to the root and pre-samples every chance outcome
///    for the iteration, so chance nodes cost nothing to walk through.
/// 2. [`Game::current_node`] returns the node under the cursor.
/// 3. At a player node the engine commits to trying actions in index
///    order, starting at 0, via [`Game::on_player_action_chosen`]. Action
///    index 0 must therefore always be a legal first try — games are
///    written against this ordering and the engine preserves it exactly.
/// 4. [`Game::back`] pops the cursor to the parent while the engine
///    unwinds.
pub trait Game: Send {
    /// Number of players. Must be greater than 1.
    fn num_players(&self) -> usize;

    /// Upper bound on tree depth (number of node levels, root inclusive).
    /// Must be positive; it sizes the engine's scratch arrays.
    fn max_depth(&self) -> usize;

    /// Largest action count of any player node in the tree.
    fn max_actions_per_player_node(&self) -> usize;

    /// Begin a new iteration: reset the cursor to the root and pre-sample
    /// all chance outcomes.
    fn on_iteration_start(&mut self);

    /// The node under the cursor.
    fn current_node(&mut self) -> NodeRef;

    /// Advance past the current chance node, returning the index of the
    /// pre-sampled outcome. Only called when the current node is chance.
    fn choose_chance_action(&mut self) -> usize;

    /// Advance the cursor after the engine commits to `action` at the
    /// current player node. Called with 0 on the first visit, then with
    /// each subsequent index as the engine walks the action list in order.
    fn on_player_action_chosen(&mut self, action: usize);

    /// Pop the cursor to the parent of the current node.
    ///
    /// Fails with [`GameError::BackFromRoot`] when the cursor is already
    /// at the root.
    fn back(&mut self) -> Result<(), GameError>;

    /// All player nodes of the tree in a stable order.
    ///
    /// The order is the persistence order: loaders read and write node
    /// weights in exactly this sequence. The executor failure path also
    /// sweeps this list to release abandoned locks.
    fn player_nodes(&self) -> &[NodeRef];
}

/// A game that can mint additional instances over the same node tree.
///
/// The new instance shares the original's node objects — so concurrent
/// engines accumulate into the same regrets and strategy weights — but has
/// its own private cursor, RNG, and sampled chance outcomes. This is what
/// lets the multi-threaded executors run one engine per worker against a
/// single logical tree without racing on traversal state.
pub trait SharingGame: Game + Sized {
    /// Create an instance sharing this game's nodes with independent
    /// traversal state.
    fn share(&self) -> Self;
}
