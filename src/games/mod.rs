//! Game implementations for the CFR engine.
//!
//! Games here serve three purposes:
//!
//! 1. **Validation**: games with known Nash equilibria (Kuhn poker) verify
//!    the engine end to end.
//! 2. **Examples**: they demonstrate how to implement the cursor-style
//!    [`crate::cfr::Game`] protocol and the sharing-instance contract over
//!    a pre-built node tree.
//! 3. **Benchmarks**: standardized small games for performance testing.
//!
//! ## Adding New Games
//!
//! 1. Build the node tree once (player nodes keyed by information set,
//!    terminal nodes per outcome) and wrap it in an `Arc` so sharing
//!    instances reference the same nodes.
//! 2. Implement [`crate::cfr::Game`] as a cursor over that tree, and
//!    [`crate::cfr::SharingGame`] by cloning the tree handle with fresh
//!    traversal state.
//! 3. Add tests that verify expected behavior.
//!
//! See the [`kuhn`] module for a complete example.

pub mod kuhn;
