//! HNSW (Hierarchical Navigable Small World) index
//!
//! A layered proximity graph: sparse upper layers route searches quickly
//! toward a neighborhood, the dense entry layer finishes the job with a beam
//! search. Layer numbering runs bottom-up; see `graph.rs` for the
//! orientation this engine inherits.

mod graph;
mod node;

pub use graph::{Hnsw, HnswParams, HnswStats};
pub use node::HnswNode;
