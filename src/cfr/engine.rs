//! Chance-Sampling CFR training engine.
//!
//! One [`Engine`] drives one [`Game`] through CS-CFR iterations: chance
//! outcomes are sampled once per iteration (by the game, at iteration
//! start), while player actions are traversed in full. Regrets and strategy
//! weights accumulate on the game's player nodes; the average strategy over
//! iterations converges to a Nash equilibrium.
//!
//! # Traversal
//!
//! The tree walk is recursive in shape but stack-free in implementation:
//! because the game declares a depth bound up front, the engine pre-sizes
//! depth-indexed scratch arrays (the flattened call stack) and walks the
//! tree with an explicit depth cursor and a forward/backward flag. One
//! iteration allocates nothing.
//!
//! Forward steps descend: terminals resolve their utility, chance nodes are
//! stepped through, player nodes compute a regret-matched strategy, add it
//! into their strategy sum, and commit to action 0. Backward steps unwind:
//! each finished subtree's utility folds into its parent's expected value;
//! once a player node's last action returns, the counterfactual weight
//! (everyone's reach probability but the actor's own) scales the regret
//! update, and the walk resumes with the next untried action or keeps
//! unwinding.
//!
//! # Locking
//!
//! With [`EngineConfig::lock_player_nodes`] set, each player node's lock is
//! held from first touch on the forward pass to the final regret update on
//! the backward pass — one full visit, not the whole iteration. If an
//! iteration aborts with an error, locks acquired along the current path
//! remain held; the multi-threaded executors recover them with the
//! force-release sweep.

use std::sync::Arc;

use crate::cfr::config::{ConfigError, EngineConfig};
use crate::cfr::game::{Game, GameError};
use crate::cfr::node::{Node, NodeRef, PlayerNode};
use crate::cfr::terminal::TerminalUtilReader;
use crate::cfr::utility::SharedUtilityManager;

/// The CS-CFR training engine.
///
/// # Example
/// ```ignore
/// use cfr_engine::cfr::{Engine, EngineConfig};
///
/// let mut engine = Engine::new(my_game)?;
/// engine.set_config(EngineConfig::single_threaded());
/// engine.train(10_000)?;
/// ```
pub struct Engine<G: Game> {
    game: G,
    config: EngineConfig,
    utility: Arc<SharedUtilityManager>,
    reader: Option<Arc<dyn TerminalUtilReader>>,

    num_players: usize,
    max_depth: usize,
    max_actions: usize,

    // Depth-indexed scratch, the flattened call stack of the tree walk.
    // Sized once at construction, reused every iteration.
    iter_nodes: Vec<Option<NodeRef>>,
    last_action: Vec<usize>,
    realization_weight: Vec<Vec<f64>>,
    utilities: Vec<Vec<f64>>,
    per_action_utility: Vec<Vec<Vec<f64>>>,
    strategy: Vec<Vec<f64>>,
}

impl<G: Game> Engine<G> {
    /// Create an engine bound to `game`, with a private utility manager
    /// and the default configuration.
    ///
    /// Fails if the game declares fewer than two players or a zero depth
    /// bound.
    pub fn new(game: G) -> Result<Self, ConfigError> {
        let num_players = game.num_players();
        if num_players <= 1 {
            return Err(ConfigError::InvalidPlayerCount(num_players));
        }
        let max_depth = game.max_depth();
        if max_depth == 0 {
            return Err(ConfigError::InvalidMaxDepth);
        }
        let max_actions = game.max_actions_per_player_node().max(1);

        Ok(Self {
            utility: Arc::new(SharedUtilityManager::new(num_players)),
            reader: None,
            config: EngineConfig::default(),
            num_players,
            max_depth,
            max_actions,
            iter_nodes: vec![None; max_depth],
            last_action: vec![0; max_depth],
            realization_weight: vec![vec![0.0; num_players]; max_depth],
            utilities: vec![vec![0.0; num_players]; max_depth],
            per_action_utility: vec![vec![vec![0.0; num_players]; max_actions]; max_depth],
            strategy: vec![vec![0.0; max_actions]; max_depth],
            game,
        })
    }

    /// Replace the engine configuration.
    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    /// Report iteration utilities to `utility` instead of the engine's
    /// private manager. Executors use this to share one accumulator across
    /// worker engines.
    pub fn set_utility_manager(&mut self, utility: Arc<SharedUtilityManager>) {
        self.utility = utility;
    }

    /// Resolve indirect terminals through `reader`.
    pub fn set_terminal_util_reader(&mut self, reader: Arc<dyn TerminalUtilReader>) {
        self.reader = Some(reader);
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The bound game.
    pub fn game(&self) -> &G {
        &self.game
    }

    /// The utility manager this engine reports to.
    pub fn utility_manager(&self) -> &Arc<SharedUtilityManager> {
        &self.utility
    }

    /// Run `iterations` training iterations sequentially.
    pub fn train(&mut self, iterations: u64) -> Result<(), GameError> {
        for _ in 0..iterations {
            self.run_iteration()?;
        }
        Ok(())
    }

    /// Run exactly one CS-CFR iteration over the bound game.
    ///
    /// On success the iteration's root utility vector has been reported to
    /// the utility manager. On error, node locks acquired along the
    /// in-flight path are left held (see the module docs on recovery).
    pub fn run_iteration(&mut self) -> Result<(), GameError> {
        for w in self.realization_weight[0].iter_mut() {
            *w = 1.0;
        }
        self.game.on_iteration_start();

        // `depth` is the cursor into the scratch arrays; `descending`
        // selects the forward (fetch node, go deeper) or backward (fold
        // child utility into parent) phase.
        let mut depth: usize = 0;
        let mut descending = true;

        loop {
            if descending {
                if depth >= self.max_depth {
                    return Err(GameError::MaxDepthExceeded {
                        max_depth: self.max_depth,
                    });
                }
                let node = self.game.current_node();
                match &*node {
                    Node::Terminal(terminal) => {
                        terminal.resolve(self.reader.as_deref(), &mut self.utilities[depth])?;
                        if depth == 0 {
                            break; // trivial one-node game
                        }
                        descending = false;
                    }
                    Node::Chance => {
                        if depth + 1 >= self.max_depth {
                            return Err(GameError::MaxDepthExceeded {
                                max_depth: self.max_depth,
                            });
                        }
                        // Chance contributes no strategy weighting; the
                        // realization weights pass through unchanged.
                        let (head, tail) = self.realization_weight.split_at_mut(depth + 1);
                        tail[0].copy_from_slice(&head[depth]);
                        self.iter_nodes[depth] = Some(Arc::clone(&node));
                        self.game.choose_chance_action();
                        depth += 1;
                    }
                    Node::Player(player_node) => {
                        if depth + 1 >= self.max_depth {
                            return Err(GameError::MaxDepthExceeded {
                                max_depth: self.max_depth,
                            });
                        }
                        let actions = player_node.num_actions();
                        if actions > self.max_actions {
                            return Err(GameError::InconsistentNode { depth });
                        }
                        self.enter_player_node(player_node, depth, actions);
                        self.iter_nodes[depth] = Some(Arc::clone(&node));
                        self.game.on_player_action_chosen(0);
                        depth += 1;
                    }
                }
            } else {
                self.game.back()?;
                let child_depth = depth;
                depth -= 1;
                let node = self.iter_nodes[depth]
                    .clone()
                    .ok_or(GameError::InconsistentNode { depth })?;
                match &*node {
                    Node::Chance => {
                        // Utility passes through chance unchanged.
                        let (head, tail) = self.utilities.split_at_mut(child_depth);
                        head[depth].copy_from_slice(&tail[0]);
                        if depth == 0 {
                            break;
                        }
                    }
                    Node::Player(player_node) => {
                        let finished = self.fold_player_action(player_node, depth, child_depth);
                        if finished {
                            if depth == 0 {
                                break;
                            }
                        } else {
                            descending = true;
                            depth += 1;
                        }
                    }
                    Node::Terminal(_) => {
                        return Err(GameError::InconsistentNode { depth });
                    }
                }
            }
        }

        self.utility.add_iter_util(&self.utilities[0]);
        Ok(())
    }

    /// Forward-pass entry into a player node: acquire its lock, compute the
    /// regret-matched strategy, accumulate the strategy sum over every
    /// action, and propagate the realization weights for action 0.
    fn enter_player_node(&mut self, player_node: &PlayerNode, depth: usize, actions: usize) {
        if self.config.lock_player_nodes {
            player_node.acquire();
        }
        // Safety: either the lock was just acquired, or the caller runs the
        // engine single-threaded by configuration.
        let state = unsafe { player_node.state_raw() };

        // Regret matching: strategy proportional to positive regrets,
        // uniform when none are positive.
        let mut positive_sum = 0.0;
        for a in 0..actions {
            let r = state.regret_sum[a].max(0.0);
            self.strategy[depth][a] = r;
            positive_sum += r;
        }
        if positive_sum > 0.0 {
            for a in 0..actions {
                self.strategy[depth][a] /= positive_sum;
            }
        } else {
            let uniform = 1.0 / actions as f64;
            for a in 0..actions {
                self.strategy[depth][a] = uniform;
            }
        }

        // Full strategy-sum accumulation over all actions, weighted by the
        // actor's own reach. This happens once per visit, here, not per
        // sampled action — the CS-CFR characteristic.
        let reach = self.realization_weight[depth][player_node.player()];
        for a in 0..actions {
            state.strat_sum[a] += reach * self.strategy[depth][a];
        }

        for u in self.utilities[depth].iter_mut() {
            *u = 0.0;
        }
        self.last_action[depth] = 0;

        let (head, tail) = self.realization_weight.split_at_mut(depth + 1);
        tail[0].copy_from_slice(&head[depth]);
        tail[0][player_node.player()] *= self.strategy[depth][0];
    }

    /// Backward-pass fold at a player node: bank the just-evaluated
    /// action's utility, and either advance to the next action (returns
    /// `false`) or, after the last action, apply the regret update and
    /// release the node (returns `true`).
    fn fold_player_action(
        &mut self,
        player_node: &PlayerNode,
        depth: usize,
        child_depth: usize,
    ) -> bool {
        let actions = player_node.num_actions();
        let player = player_node.player();
        let action = self.last_action[depth];

        self.per_action_utility[depth][action].copy_from_slice(&self.utilities[child_depth]);
        let prob = self.strategy[depth][action];
        for p in 0..self.num_players {
            self.utilities[depth][p] += prob * self.per_action_utility[depth][action][p];
        }

        if action + 1 < actions {
            // More actions to evaluate: recompute the child realization
            // weights for the next one and descend again.
            let next = action + 1;
            self.last_action[depth] = next;
            let (head, tail) = self.realization_weight.split_at_mut(depth + 1);
            tail[0].copy_from_slice(&head[depth]);
            tail[0][player] *= self.strategy[depth][next];
            self.game.on_player_action_chosen(next);
            return false;
        }

        // Last action evaluated: the node's expected utility is complete.
        // The counterfactual weight excludes the actor's own reach.
        let mut weight = 1.0;
        for p in 0..self.num_players {
            if p != player {
                weight *= self.realization_weight[depth][p];
            }
        }

        // Safety: same locking argument as in `enter_player_node`; the
        // lock taken there is still held.
        let state = unsafe { player_node.state_raw() };
        let node_utility = self.utilities[depth][player];
        for a in 0..actions {
            state.regret_sum[a] +=
                weight * (self.per_action_utility[depth][a][player] - node_utility);
        }
        if self.config.update_visits_and_weight {
            state.visits += 1;
            state.real_weight_sum += weight;
        }
        if self.config.lock_player_nodes {
            player_node.release();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfr::config::EngineConfig;

    /// Matching pennies as a cursor game: player 0 picks heads/tails,
    /// player 1 picks without observing (both of player 1's decision points
    /// map to one shared node). Payoff +1 to player 0 on a match.
    /// Equilibrium: both uniform, game value 0.
    struct MatchingPennies {
        p0: NodeRef,
        p1: NodeRef,
        terminals: [[NodeRef; 2]; 2],
        player_nodes: Vec<NodeRef>,
        path: Vec<usize>,
        declared_depth: usize,
    }

    impl MatchingPennies {
        fn new() -> Self {
            Self::with_depth(3)
        }

        fn with_depth(declared_depth: usize) -> Self {
            let p0 = Node::player(0, 2);
            let p1 = Node::player(1, 2);
            let payoff = |i: usize, j: usize| -> f64 {
                if i == j {
                    1.0
                } else {
                    -1.0
                }
            };
            let terminals = [
                [
                    Node::terminal(vec![payoff(0, 0), -payoff(0, 0)]),
                    Node::terminal(vec![payoff(0, 1), -payoff(0, 1)]),
                ],
                [
                    Node::terminal(vec![payoff(1, 0), -payoff(1, 0)]),
                    Node::terminal(vec![payoff(1, 1), -payoff(1, 1)]),
                ],
            ];
            Self {
                player_nodes: vec![Arc::clone(&p0), Arc::clone(&p1)],
                p0,
                p1,
                terminals,
                path: Vec::new(),
                declared_depth,
            }
        }
    }

    impl Game for MatchingPennies {
        fn num_players(&self) -> usize {
            2
        }

        fn max_depth(&self) -> usize {
            self.declared_depth
        }

        fn max_actions_per_player_node(&self) -> usize {
            2
        }

        fn on_iteration_start(&mut self) {
            self.path.clear();
        }

        fn current_node(&mut self) -> NodeRef {
            match self.path.len() {
                0 => Arc::clone(&self.p0),
                1 => Arc::clone(&self.p1),
                _ => Arc::clone(&self.terminals[self.path[0]][self.path[1]]),
            }
        }

        fn choose_chance_action(&mut self) -> usize {
            unreachable!("matching pennies has no chance nodes")
        }

        fn on_player_action_chosen(&mut self, action: usize) {
            self.path.push(action);
        }

        fn back(&mut self) -> Result<(), GameError> {
            self.path.pop().map(|_| ()).ok_or(GameError::BackFromRoot)
        }

        fn player_nodes(&self) -> &[NodeRef] {
            &self.player_nodes
        }
    }

    /// A game with too few players, for construction validation.
    struct Solitaire;

    impl Game for Solitaire {
        fn num_players(&self) -> usize {
            1
        }
        fn max_depth(&self) -> usize {
            1
        }
        fn max_actions_per_player_node(&self) -> usize {
            1
        }
        fn on_iteration_start(&mut self) {}
        fn current_node(&mut self) -> NodeRef {
            Node::terminal(vec![0.0])
        }
        fn choose_chance_action(&mut self) -> usize {
            0
        }
        fn on_player_action_chosen(&mut self, _action: usize) {}
        fn back(&mut self) -> Result<(), GameError> {
            Err(GameError::BackFromRoot)
        }
        fn player_nodes(&self) -> &[NodeRef] {
            &[]
        }
    }

    fn single_threaded_engine(game: MatchingPennies) -> Engine<MatchingPennies> {
        let mut engine = Engine::new(game).unwrap();
        // The shared player-1 node is visited twice per iteration, so
        // per-visit locking would self-deadlock; this game is trained
        // single-threaded.
        engine.set_config(EngineConfig::single_threaded());
        engine
    }

    #[test]
    fn test_rejects_single_player_game() {
        assert!(matches!(
            Engine::new(Solitaire),
            Err(ConfigError::InvalidPlayerCount(1))
        ));
    }

    #[test]
    fn test_single_iteration_reports_utility() {
        let mut engine = single_threaded_engine(MatchingPennies::new());
        engine.run_iteration().unwrap();
        assert_eq!(engine.utility_manager().iterations(), 1);

        // Terminal payoffs are zero-sum, so the reported utility must be
        // zero-sum too.
        let mut mean = [9.9; 2];
        engine.utility_manager().read(&mut mean);
        assert!((mean[0] + mean[1]).abs() < 1e-12);
    }

    #[test]
    fn test_strategy_is_normalized_after_training() {
        let mut engine = single_threaded_engine(MatchingPennies::new());
        engine.train(100).unwrap();

        for node in engine.game().player_nodes() {
            let player = node.as_player().unwrap();
            let strategy = player.current_strategy();
            let sum: f64 = strategy.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "strategy sums to {}", sum);
            assert!(strategy.iter().all(|&p| p >= 0.0));
        }
    }

    #[test]
    fn test_strategy_sum_is_monotonic() {
        let mut engine = single_threaded_engine(MatchingPennies::new());
        let mut previous = vec![vec![0.0; 2]; 2];
        for _ in 0..50 {
            engine.run_iteration().unwrap();
            for (i, node) in engine.game().player_nodes().iter().enumerate() {
                node.as_player().unwrap().with_state(|state| {
                    for (a, (&now, &before)) in
                        state.strat_sum.iter().zip(previous[i].iter()).enumerate()
                    {
                        assert!(
                            now >= before,
                            "strat_sum[{}] decreased: {} -> {}",
                            a,
                            before,
                            now
                        );
                    }
                    previous[i].copy_from_slice(&state.strat_sum);
                });
            }
        }
    }

    #[test]
    fn test_matching_pennies_converges_to_uniform() {
        let mut engine = single_threaded_engine(MatchingPennies::new());
        engine.train(50_000).unwrap();

        for node in engine.game().player_nodes() {
            let average = node.as_player().unwrap().average_strategy();
            assert!(
                (average[0] - 0.5).abs() < 0.05,
                "average strategy {:?} should be near uniform",
                average
            );
        }

        let mut mean = [0.0; 2];
        engine.utility_manager().read(&mut mean);
        assert!(mean[0].abs() < 0.05, "game value {} should be near 0", mean[0]);
    }

    #[test]
    fn test_visit_tracking_counts_each_visit() {
        let mut engine = single_threaded_engine(MatchingPennies::new());
        engine.set_config(
            EngineConfig::single_threaded().with_visit_tracking(true),
        );
        engine.train(10).unwrap();

        let nodes = engine.game().player_nodes();
        // Player 0's node is visited once per iteration; player 1's shared
        // node twice (once under each of player 0's actions).
        nodes[0].as_player().unwrap().with_state(|state| {
            assert_eq!(state.visits, 10);
            assert!(state.real_weight_sum > 0.0);
        });
        nodes[1].as_player().unwrap().with_state(|state| {
            assert_eq!(state.visits, 20);
        });
    }

    #[test]
    fn test_under_provisioned_depth_fails_deterministically() {
        let game = MatchingPennies::with_depth(2); // actual tree needs 3
        let mut engine = single_threaded_engine(game);
        assert!(matches!(
            engine.run_iteration(),
            Err(GameError::MaxDepthExceeded { max_depth: 2 })
        ));
    }

    #[test]
    fn test_locked_training_releases_all_locks() {
        // Distinct-node game: give player 1 observing nodes so each node is
        // visited once per iteration and per-visit locking is legal.
        struct Observed {
            p0: NodeRef,
            p1: [NodeRef; 2],
            terminals: [[NodeRef; 2]; 2],
            player_nodes: Vec<NodeRef>,
            path: Vec<usize>,
        }
        impl Observed {
            fn new() -> Self {
                let p0 = Node::player(0, 2);
                let p1 = [Node::player(1, 2), Node::player(1, 2)];
                let terminals = [
                    [Node::terminal(vec![1.0, -1.0]), Node::terminal(vec![-1.0, 1.0])],
                    [Node::terminal(vec![-1.0, 1.0]), Node::terminal(vec![1.0, -1.0])],
                ];
                Self {
                    player_nodes: vec![
                        Arc::clone(&p0),
                        Arc::clone(&p1[0]),
                        Arc::clone(&p1[1]),
                    ],
                    p0,
                    p1,
                    terminals,
                    path: Vec::new(),
                }
            }
        }
        impl Game for Observed {
            fn num_players(&self) -> usize {
                2
            }
            fn max_depth(&self) -> usize {
                3
            }
            fn max_actions_per_player_node(&self) -> usize {
                2
            }
            fn on_iteration_start(&mut self) {
                self.path.clear();
            }
            fn current_node(&mut self) -> NodeRef {
                match self.path.len() {
                    0 => Arc::clone(&self.p0),
                    1 => Arc::clone(&self.p1[self.path[0]]),
                    _ => Arc::clone(&self.terminals[self.path[0]][self.path[1]]),
                }
            }
            fn choose_chance_action(&mut self) -> usize {
                unreachable!()
            }
            fn on_player_action_chosen(&mut self, action: usize) {
                self.path.push(action);
            }
            fn back(&mut self) -> Result<(), GameError> {
                self.path.pop().map(|_| ()).ok_or(GameError::BackFromRoot)
            }
            fn player_nodes(&self) -> &[NodeRef] {
                &self.player_nodes
            }
        }

        let mut engine = Engine::new(Observed::new()).unwrap();
        engine.set_config(EngineConfig::default()); // locking on
        engine.train(25).unwrap();
        for node in engine.game().player_nodes() {
            assert!(!node.as_player().unwrap().is_locked());
        }
    }
}
