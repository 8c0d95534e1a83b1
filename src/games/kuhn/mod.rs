//! Kuhn poker over a shared node tree, for engine validation.
//!
//! Kuhn poker is the standard correctness check for CFR implementations:
//! three cards (Jack = 0, Queen = 1, King = 2), two players who each ante
//! one chip and receive one card, one betting round of pass/bet, higher
//! card wins at showdown.
//!
//! The analytical equilibrium pins most of the strategy down:
//!
//! - First player bets the Jack with some probability α ∈ [0, 1/3], never
//!   bets the Queen, and bets the King with probability 3α.
//! - Second player facing a bet folds the Jack, calls with the Queen one
//!   third of the time, and always calls with the King.
//! - The game value is -1/18 for the first player.
//!
//! The node tree is built once: a single chance root for the deal, one
//! player node per information set (card × betting history, shared across
//! deals), and one terminal node per deal and terminal history carrying the
//! concrete payoff. Sharing instances clone the tree handle with fresh
//! traversal state, so concurrent engines train the same accumulators.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::cfr::game::{Game, GameError, SharingGame};
use crate::cfr::node::{Node, NodeRef};

/// Betting histories at which a player acts, in node-creation order.
const DECISION_HISTORIES: [&str; 4] = ["", "p", "b", "pb"];

/// Terminal betting histories, in node-creation order.
const TERMINAL_HISTORIES: [&str; 5] = ["pp", "bp", "pbp", "pbb", "bb"];

/// The immutable Kuhn node tree, shared between game instances.
#[derive(Debug)]
struct KuhnTree {
    root: NodeRef,
    /// Player nodes indexed by `card * 4 + history index`; also the
    /// persistence order.
    players: Vec<NodeRef>,
    /// Terminal nodes indexed by `deal index * 5 + history index`.
    terminals: Vec<NodeRef>,
    /// Player nodes by information-set key (`"card:history"`), for
    /// strategy inspection and export.
    info_sets: FxHashMap<String, NodeRef>,
}

impl KuhnTree {
    fn build() -> Self {
        let root = Node::chance();

        let mut players = Vec::with_capacity(12);
        let mut info_sets = FxHashMap::default();
        for card in 0u8..3 {
            for history in DECISION_HISTORIES {
                let node = Node::player(acting_player(history), 2);
                info_sets.insert(format!("{}:{}", card, history), Arc::clone(&node));
                players.push(node);
            }
        }

        let mut terminals = Vec::with_capacity(30);
        for c0 in 0u8..3 {
            for c1 in 0u8..3 {
                if c0 == c1 {
                    continue;
                }
                for history in TERMINAL_HISTORIES {
                    let p0 = terminal_payoff(c0, c1, history);
                    terminals.push(Node::terminal(vec![p0, -p0]));
                }
            }
        }

        Self {
            root,
            players,
            terminals,
            info_sets,
        }
    }

    fn player_node(&self, card: u8, history: &str) -> NodeRef {
        let index = card as usize * 4 + decision_index(history);
        Arc::clone(&self.players[index])
    }

    fn terminal_node(&self, c0: u8, c1: u8, history: &str) -> NodeRef {
        let index = deal_index(c0, c1) * 5 + terminal_index(history);
        Arc::clone(&self.terminals[index])
    }
}

/// Dense index of an ordered deal of two distinct cards out of three.
fn deal_index(c0: u8, c1: u8) -> usize {
    debug_assert_ne!(c0, c1);
    let (c0, c1) = (c0 as usize, c1 as usize);
    c0 * 2 + if c1 > c0 { c1 - 1 } else { c1 }
}

fn decision_index(history: &str) -> usize {
    DECISION_HISTORIES
        .iter()
        .position(|&h| h == history)
        .unwrap_or(0)
}

fn terminal_index(history: &str) -> usize {
    TERMINAL_HISTORIES
        .iter()
        .position(|&h| h == history)
        .unwrap_or(0)
}

/// Which player acts at a decision history.
fn acting_player(history: &str) -> usize {
    match history {
        "" | "pb" => 0,
        _ => 1,
    }
}

fn is_terminal(history: &str) -> bool {
    matches!(history, "pp" | "bp" | "pbp" | "pbb" | "bb")
}

/// First player's payoff at a terminal history given both cards.
fn terminal_payoff(c0: u8, c1: u8, history: &str) -> f64 {
    let showdown = |stake: f64| if c0 > c1 { stake } else { -stake };
    match history {
        // both pass: showdown for the antes
        "pp" => showdown(1.0),
        // bet folded out, bettor takes the ante
        "bp" => 1.0,
        "pbp" => -1.0,
        // bet and call: showdown for ante plus bet
        "pbb" | "bb" => showdown(2.0),
        _ => 0.0,
    }
}

/// Kuhn poker as a cursor game over the shared tree.
///
/// Action index 0 is pass (check/fold) and index 1 is bet (bet/call) at
/// every decision point, so action 0 is always a legal first try as the
/// engine's ordering contract requires.
pub struct KuhnGame {
    tree: Arc<KuhnTree>,
    rng: StdRng,
    cards: [u8; 2],
    dealt: bool,
    history: String,
}

impl KuhnGame {
    /// Create a game with a freshly built node tree, optionally seeded for
    /// reproducible deals.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            tree: Arc::new(KuhnTree::build()),
            rng,
            cards: [0, 1],
            dealt: false,
            history: String::with_capacity(3),
        }
    }

    /// Player node for an information-set key like `"2:pb"` (card and
    /// betting history), if it exists.
    pub fn info_set(&self, key: &str) -> Option<NodeRef> {
        self.tree.info_sets.get(key).cloned()
    }

    /// All information-set keys, unordered.
    pub fn info_set_keys(&self) -> Vec<String> {
        self.tree.info_sets.keys().cloned().collect()
    }

    /// Average strategy for an information-set key: `[pass, bet]`.
    pub fn average_strategy(&self, key: &str) -> Option<Vec<f64>> {
        self.info_set(key)
            .and_then(|node| node.as_player().map(|player| player.average_strategy()))
    }
}

impl Game for KuhnGame {
    fn num_players(&self) -> usize {
        2
    }

    fn max_depth(&self) -> usize {
        // chance, two or three decisions, terminal
        5
    }

    fn max_actions_per_player_node(&self) -> usize {
        2
    }

    fn on_iteration_start(&mut self) {
        // Pre-sample the deal: the chance root is stepped through without
        // further randomness during the walk.
        let mut deck = [0u8, 1, 2];
        for i in (1..3).rev() {
            let j = self.rng.gen_range(0..=i);
            deck.swap(i, j);
        }
        self.cards = [deck[0], deck[1]];
        self.dealt = false;
        self.history.clear();
    }

    fn current_node(&mut self) -> NodeRef {
        if !self.dealt {
            return Arc::clone(&self.tree.root);
        }
        if is_terminal(&self.history) {
            return self
                .tree
                .terminal_node(self.cards[0], self.cards[1], &self.history);
        }
        let player = acting_player(&self.history);
        self.tree.player_node(self.cards[player], &self.history)
    }

    fn choose_chance_action(&mut self) -> usize {
        self.dealt = true;
        deal_index(self.cards[0], self.cards[1])
    }

    fn on_player_action_chosen(&mut self, action: usize) {
        self.history.push(if action == 0 { 'p' } else { 'b' });
    }

    fn back(&mut self) -> Result<(), GameError> {
        if self.history.pop().is_some() {
            return Ok(());
        }
        if self.dealt {
            self.dealt = false;
            return Ok(());
        }
        Err(GameError::BackFromRoot)
    }

    fn player_nodes(&self) -> &[NodeRef] {
        &self.tree.players
    }
}

impl SharingGame for KuhnGame {
    fn share(&self) -> Self {
        Self {
            tree: Arc::clone(&self.tree),
            rng: StdRng::from_entropy(),
            cards: [0, 1],
            dealt: false,
            history: String::with_capacity(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfr::config::EngineConfig;
    use crate::cfr::engine::Engine;
    use crate::cfr::executor::{MultiThreadExecutor, SingleThreadExecutor};
    use crate::cfr::loader::{ExecutionLoader, FileLoader};
    use crate::cfr::node::Node as CfrNode;

    #[test]
    fn test_tree_shape() {
        let game = KuhnGame::new(Some(1));
        assert_eq!(game.player_nodes().len(), 12);
        assert_eq!(game.tree.terminals.len(), 30);
        assert!(matches!(&*game.tree.root, CfrNode::Chance));

        // every info set is a player node with two actions
        for key in game.info_set_keys() {
            let node = game.info_set(&key).unwrap();
            assert_eq!(node.as_player().unwrap().num_actions(), 2);
        }
    }

    #[test]
    fn test_terminal_payoffs() {
        // showdown after both pass: king beats jack for the ante
        assert_eq!(terminal_payoff(2, 0, "pp"), 1.0);
        assert_eq!(terminal_payoff(0, 2, "pp"), -1.0);
        // folds award the pot regardless of cards
        assert_eq!(terminal_payoff(0, 2, "bp"), 1.0);
        assert_eq!(terminal_payoff(2, 0, "pbp"), -1.0);
        // called bets double the stake
        assert_eq!(terminal_payoff(2, 1, "bb"), 2.0);
        assert_eq!(terminal_payoff(1, 2, "pbb"), -2.0);
    }

    #[test]
    fn test_cursor_walk_and_back() {
        let mut game = KuhnGame::new(Some(3));
        game.on_iteration_start();
        assert!(matches!(&*game.current_node(), CfrNode::Chance));

        game.choose_chance_action();
        let root_decision = game.current_node();
        assert_eq!(root_decision.as_player().unwrap().player(), 0);

        game.on_player_action_chosen(1); // bet
        assert_eq!(game.current_node().as_player().unwrap().player(), 1);

        game.on_player_action_chosen(0); // fold
        assert!(matches!(&*game.current_node(), CfrNode::Terminal(_)));

        game.back().unwrap(); // to "b"
        game.back().unwrap(); // to ""
        game.back().unwrap(); // to chance root
        assert!(matches!(&*game.current_node(), CfrNode::Chance));
        assert!(matches!(game.back(), Err(GameError::BackFromRoot)));
    }

    #[test]
    fn test_sharing_instances_share_nodes() {
        let base = KuhnGame::new(None);
        let shared = base.share();
        for (a, b) in base.player_nodes().iter().zip(shared.player_nodes()) {
            assert!(Arc::ptr_eq(a, b));
        }
    }

    #[test]
    fn test_kuhn_cfr_convergence() {
        let game = KuhnGame::new(Some(42));
        let mut engine = Engine::new(game).unwrap();
        engine.set_config(EngineConfig::single_threaded());
        engine.train(200_000).unwrap();

        let game = engine.game();

        // Queen is never bet at the root.
        let queen = game.average_strategy("1:").unwrap();
        assert!(queen[0] > 0.95, "queen should pass, got {:?}", queen);

        // King is bet three times as often as the jack is bluffed.
        let jack_bet = game.average_strategy("0:").unwrap()[1];
        let king_bet = game.average_strategy("2:").unwrap()[1];
        assert!(
            jack_bet < 1.0 / 3.0 + 0.05,
            "jack bluff rate {} above the equilibrium range [0, 1/3]",
            jack_bet
        );
        assert!(
            (king_bet - 3.0 * jack_bet).abs() < 0.05,
            "king bet {} should be 3 × jack bet {}",
            king_bet,
            jack_bet
        );

        // Second player facing a bet: fold jack, always call king, call
        // queen one third of the time.
        let jack_vs_bet = game.average_strategy("0:b").unwrap();
        let queen_vs_bet = game.average_strategy("1:b").unwrap();
        let king_vs_bet = game.average_strategy("2:b").unwrap();
        assert!(jack_vs_bet[0] > 0.95, "jack should fold: {:?}", jack_vs_bet);
        assert!(king_vs_bet[1] > 0.95, "king should call: {:?}", king_vs_bet);
        assert!(
            (queen_vs_bet[1] - 1.0 / 3.0).abs() < 0.05,
            "queen call {} should be near 1/3",
            queen_vs_bet[1]
        );

        // Second player bets the king after a check.
        let king_vs_check = game.average_strategy("2:p").unwrap();
        assert!(king_vs_check[1] > 0.95, "{:?}", king_vs_check);

        // Mean game value for the first player converges to -1/18.
        let mut mean = [0.0; 2];
        engine.utility_manager().read(&mut mean);
        assert!(
            (mean[0] - (-1.0 / 18.0)).abs() < 0.02,
            "game value {} should be near -1/18",
            mean[0]
        );
    }

    #[test]
    fn test_multi_threaded_training_loses_no_updates() {
        let game = KuhnGame::new(None);
        let mut executor = MultiThreadExecutor::new(
            game,
            EngineConfig::default().with_visit_tracking(true),
            4,
            None,
        )
        .unwrap();
        executor.run(40_000).unwrap();

        assert_eq!(executor.utility_manager().iterations(), 40_000);

        // Exactly one root info set (the dealt card) is visited per
        // iteration; a lost or torn update would break the total.
        let game = executor.engines()[0].game();
        let root_visits: u64 = ["0:", "1:", "2:"]
            .iter()
            .map(|key| {
                let node = game.info_set(key).unwrap();
                node.as_player().unwrap().with_state(|state| state.visits)
            })
            .sum();
        assert_eq!(root_visits, 40_000);

        for node in game.player_nodes() {
            assert!(!node.as_player().unwrap().is_locked());
        }

        // Loose convergence: the shared tree really was trained.
        let mut mean = [0.0; 2];
        executor.utility_manager().read(&mut mean);
        assert!((mean[0] - (-1.0 / 18.0)).abs() < 0.05, "{}", mean[0]);
    }

    #[test]
    fn test_save_and_resume_through_executor() {
        let path = std::env::temp_dir().join(format!(
            "cfr-engine-kuhn-resume-{}.bin",
            std::process::id()
        ));
        std::fs::remove_file(&path).ok();

        let mut executor = SingleThreadExecutor::new(
            KuhnGame::new(Some(5)),
            EngineConfig::single_threaded(),
            Some(Box::new(FileLoader::new(&path, 2, false))),
        )
        .unwrap();
        executor.run(1_000).unwrap();
        let saved_state = executor.engine().utility_manager().state();
        let saved_strategy = executor
            .engine()
            .game()
            .average_strategy("2:")
            .unwrap();
        executor.save().unwrap();

        // A fresh game resumes exactly where the first run stopped.
        let resumed = SingleThreadExecutor::new(
            KuhnGame::new(Some(6)),
            EngineConfig::single_threaded(),
            Some(Box::new(FileLoader::new(&path, 2, false))),
        )
        .unwrap();
        assert_eq!(resumed.engine().utility_manager().state(), saved_state);
        assert_eq!(
            resumed.engine().game().average_strategy("2:").unwrap(),
            saved_strategy
        );

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_loader_flag_mismatch_rejected_at_construction() {
        let path = std::env::temp_dir().join(format!(
            "cfr-engine-kuhn-flags-{}.bin",
            std::process::id()
        ));
        let loader: Box<dyn ExecutionLoader> = Box::new(FileLoader::new(&path, 2, true));
        let result = SingleThreadExecutor::new(
            KuhnGame::new(None),
            EngineConfig::single_threaded(), // visit tracking off
            Some(loader),
        );
        assert!(result.is_err());
    }
}
