//! Quiver-DB: an in-memory vector search engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Framed TCP protocol (length-prefixed)          │
//! │        create/add/query · HNSW/Vamana/IFI/ANNOY builds      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Engine: collections + named indices          │
//! │              (coarse mutex, snapshot-owning indices)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │      quiver-core: Annoy forest · HNSW · Vamana · IVF        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod protocol;
pub mod server;

pub use engine::{Engine, EngineError, IndexConfig};
pub use protocol::ResCode;
pub use server::{serve, serve_on, ServerState};
