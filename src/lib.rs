//! # CFR Engine
//!
//! A Chance-Sampling Counterfactual Regret Minimization (CS-CFR) training
//! engine for computing approximate Nash equilibria in extensive-form
//! games.
//!
//! ## Features
//!
//! - **Generic engine**: trains any game implementing the cursor-style
//!   [`cfr::Game`] protocol
//! - **Allocation-free iterations**: the tree walk is flattened into
//!   depth-indexed scratch arrays sized once at construction
//! - **Concurrent training**: per-node locking lets multiple engines share
//!   one game tree; executors orchestrate the worker pool
//! - **Cyclic multi-step games**: terminal payoffs of one game stage can
//!   read the converging value of another, so mutually-referential stages
//!   train jointly
//! - **Checkpointing**: binary save/resume of node weights and training
//!   progress
//!
//! ## Quick Start
//!
//! ```ignore
//! use cfr_engine::cfr::{EngineConfig, MultiThreadExecutor};
//! use cfr_engine::games::kuhn::KuhnGame;
//!
//! let game = KuhnGame::new(Some(42));
//! let mut executor =
//!     MultiThreadExecutor::new(game, EngineConfig::default(), 0, None)?;
//! executor.run(1_000_000)?;
//!
//! for node in executor.engines()[0].game().player_nodes() {
//!     if let Some(player) = node.as_player() {
//!         println!("{:?}", player.average_strategy());
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        Executor                                │
//! │  single-thread / multi-thread / cyclic-steps orchestration     │
//! └────────────────────────────────────────────────────────────────┘
//!          │ owns K engines                │ save / resume
//!          ▼                               ▼
//! ┌──────────────────────┐       ┌──────────────────────┐
//! │   Engine (CS-CFR)    │       │   ExecutionLoader    │
//! │  depth-indexed walk  │       │   binary weights     │
//! └──────────────────────┘       └──────────────────────┘
//!          │ drives
//!          ▼
//! ┌──────────────────────┐       shared nodes
//! │   Game (cursor)      │◄─────────────────────► other instances
//! └──────────────────────┘
//! ```

#![warn(missing_docs)]

/// Chance-Sampling CFR core: engine, nodes, executors, persistence.
pub mod cfr;

/// Game implementations used for validation and examples.
pub mod games;

// Re-export commonly used types at crate root for convenience
pub use cfr::{
    Engine, EngineConfig, ExecutionLoader, FileLoader, Game, GameError, Node, NodeRef,
    SharingGame, UtilityState,
};
