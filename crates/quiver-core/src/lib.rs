//! Quiver Core – ANN index structures and vector math
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │   Index families: Annoy forest · HNSW · Vamana · IVF        │
//! │        (common query contract: VectorSearch trait)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │   Shared beam search · pluggable Distance · SIMD kernels    │
//! ├─────────────────────────────────────────────────────────────┤
//! │          Record<K>: keyed vectors, snapshot helpers         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each index is built from a snapshot of records which it owns outright;
//! mutations to the source collection after a build are never observed.

pub mod annoy;
pub mod distance;
pub mod hnsw;
pub mod ivf;
pub mod record;
pub mod search;
pub mod simd;
pub mod vamana;

pub use annoy::{AnnoyForest, AnnoyParams};
pub use distance::{Distance, SquaredEuclidean};
pub use hnsw::{Hnsw, HnswParams};
pub use ivf::{Ivf, IvfError, IvfParams};
pub use record::{mean_vector, Key, Record};
pub use search::{SearchHit, VectorSearch};
pub use simd::{l2_distance, l2_distance_squared};
pub use vamana::{Vamana, VamanaParams};
