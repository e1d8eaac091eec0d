//! Annoy: random-projection tree forest
//!
//! A forest of binary space-partitioning trees. Each tree splits the
//! snapshot by proximity to two randomly drawn pivots; queries descend the
//! nearer side and spill into both sides near the split boundary.

mod forest;
mod tree;

pub use forest::AnnoyForest;
pub use tree::{AnnoyParams, AnnoyTree};
