//! Indirect terminal payoffs.
//!
//! A terminal node can defer its payoff vector to a reader instead of
//! carrying it inline. The main use is cyclic multi-step games: a
//! tournament stage whose terminal "player busts down to a shorter stack"
//! pays out whatever the shorter-stack stage is currently worth — a value
//! that is itself still being trained. Wiring each stage's terminals to the
//! other stages' utility accumulators lets all stages converge jointly.

use std::sync::Arc;

use crate::cfr::game::GameError;
use crate::cfr::utility::SharedUtilityManager;

/// Resolves a terminal utility id into a payoff vector.
pub trait TerminalUtilReader: Send + Sync {
    /// Fill `dest` (first `num_players` slots) with the payoff vector for
    /// the terminal registered under `id`. `id` is non-negative by node
    /// construction.
    fn read(&self, id: i32, dest: &mut [f64]) -> Result<(), GameError>;
}

/// One target of a [`CyclicUtilReader`] link: a step's utility accumulator
/// plus the seat permutation into it.
#[derive(Debug, Clone)]
pub struct UtilLink {
    utility: Arc<SharedUtilityManager>,
    seat_map: Vec<usize>,
}

impl UtilLink {
    /// Link to `utility`, reading seat `i` of the referring game from seat
    /// `seat_map[i]` of the target step.
    ///
    /// Seat order can rotate between tournament steps (the button moves,
    /// stacks reorder), which is why the identity map is not assumed.
    pub fn new(utility: Arc<SharedUtilityManager>, seat_map: Vec<usize>) -> Self {
        Self { utility, seat_map }
    }

    /// Link with the identity seat mapping for `num_players` seats.
    pub fn direct(utility: Arc<SharedUtilityManager>, num_players: usize) -> Self {
        Self {
            utility,
            seat_map: (0..num_players).collect(),
        }
    }
}

/// Maps terminal utility ids onto other games' utility accumulators.
///
/// Id `i` resolves through the `i`-th registered [`UtilLink`]: the target
/// step's current mean utility is read tear-free, permuted through the
/// link's seat map, and written into the destination buffer.
#[derive(Debug, Clone, Default)]
pub struct CyclicUtilReader {
    links: Vec<UtilLink>,
}

impl CyclicUtilReader {
    /// Create a reader over the given links, in id order.
    pub fn new(links: Vec<UtilLink>) -> Self {
        Self { links }
    }

    /// Number of registered links.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether the reader has no links.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl TerminalUtilReader for CyclicUtilReader {
    fn read(&self, id: i32, dest: &mut [f64]) -> Result<(), GameError> {
        let link = self
            .links
            .get(id as usize)
            .ok_or(GameError::UnknownUtilId { util_id: id })?;

        let mut mean = vec![0.0; link.seat_map.len()];
        link.utility.read(&mut mean);
        for (seat, &source) in link.seat_map.iter().enumerate() {
            if seat < dest.len() {
                dest[seat] = mean[source];
            }
        }
        Ok(())
    }
}
