//! Chance-Sampling CFR (Counterfactual Regret Minimization) core.
//!
//! This module contains the generic training machinery for computing
//! approximate Nash equilibria in extensive-form games:
//!
//! - [`node`]: the game-tree node model — chance, player, and terminal
//!   nodes, with per-node locking of the trained accumulators.
//! - [`game`]: the cursor-style [`game::Game`] protocol the engine drives,
//!   and the sharing-instance contract for concurrent training.
//! - [`engine`]: the CS-CFR iteration itself — a stack-free, depth-indexed
//!   forward/backward walk with regret matching.
//! - [`utility`]: running mean of per-iteration game utility, with a
//!   thread-safe variant for shared reporting.
//! - [`terminal`]: indirect terminal payoffs, including the cyclic reader
//!   that lets mutually-referential game stages train jointly.
//! - [`executor`]: single-thread, multi-thread, and cyclic-steps
//!   orchestration over one or more engines.
//! - [`loader`]: binary persistence of node weights and training progress.
//! - [`config`]: engine configuration and construction-time validation.
//!
//! # Overview
//!
//! CFR converges to equilibrium by repeatedly walking the game tree,
//! measuring per-action regret at every decision point, and shifting each
//! node's strategy toward the actions it regrets not having taken. The
//! average strategy across iterations — not the final one — is the
//! equilibrium approximation.
//!
//! The chance-sampling variant samples every chance outcome once per
//! iteration (the game pre-draws its cards at iteration start) while still
//! traversing all *player* actions in full, which keeps iterations cheap on
//! games with large chance branching.
//!
//! # Usage
//!
//! 1. Implement [`game::Game`] (and [`game::SharingGame`] for
//!    multi-threaded training) over a tree of [`node::Node`]s.
//! 2. Hand the game to an executor, or drive an [`engine::Engine`]
//!    directly.
//! 3. Read average strategies off the player nodes and the mean game value
//!    off the utility manager.
//!
//! # References
//!
//! - Zinkevich, M., et al. "Regret Minimization in Games with Incomplete
//!   Information" (2007)
//! - Lanctot, M., et al. "Monte Carlo Sampling for Regret Minimization in
//!   Extensive Games" (2009)

pub mod config;
pub mod engine;
pub mod executor;
pub mod game;
pub mod loader;
pub mod node;
pub mod terminal;
pub mod utility;

// Re-export main types for convenient access
pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use executor::{
    CyclicStep, CyclicStepsExecutor, ExecutorError, MultiThreadExecutor, SingleThreadExecutor,
    StepLink,
};
pub use game::{Game, GameError, SharingGame};
pub use loader::{ExecutionLoader, FileLoader, LoaderError};
pub use node::{Node, NodeRef, PlayerNode, PlayerState, TerminalNode};
pub use terminal::{CyclicUtilReader, TerminalUtilReader, UtilLink};
pub use utility::{SharedUtilityManager, UtilityManager, UtilityState};
