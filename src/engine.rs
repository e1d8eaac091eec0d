//! Index catalog
//!
//! Owns the named collections and the named index instances built over them.
//! Every structural mutation flows through `&mut self`, so the server's
//! single coarse mutex around the [`Engine`] is the only locking in the
//! process.
//!
//! Indices capture a snapshot: they clone the collection's records at build
//! time and own the clone, so later mutations to the collection (including
//! deleting it outright) never touch a built index.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use thiserror::Error;

use quiver_core::{
    l2_distance_squared, AnnoyForest, AnnoyParams, Hnsw, HnswParams, Ivf, IvfError, IvfParams,
    Record, SearchHit, Vamana, VamanaParams, VectorSearch,
};

/// Default record capacity reserved when a collection is created implicitly.
pub const DEFAULT_RESERVE: usize = 5000;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("index '{0}' not found")]
    IndexNotFound(String),

    #[error("collection '{0}' already exists")]
    CollectionExists(String),

    #[error("no record with key '{0}'")]
    RecordNotFound(String),

    #[error("vector dimension {got} does not match expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("invalid index parameters: {0}")]
    InvalidParams(String),
}

/// An ordered, append-only sequence of keyed records. The dimension is fixed
/// by the first record added.
pub struct Collection {
    records: Vec<Record<String>>,
    dim: Option<usize>,
}

impl Collection {
    fn with_capacity(reserve: usize) -> Self {
        Self {
            records: Vec::with_capacity(reserve),
            dim: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn records(&self) -> &[Record<String>] {
        &self.records
    }
}

/// Build request for a named index.
#[derive(Debug, Clone, Copy)]
pub enum IndexConfig {
    Hnsw {
        ml: f64,
        dim: usize,
        num_layers: usize,
        efc: usize,
    },
    Vamana {
        dim: usize,
        r: usize,
        alpha: f32,
    },
    Ivf {
        dim: usize,
        num_centroids: usize,
        retrain_threshold: usize,
    },
    Annoy {
        dim: usize,
        threshold: f32,
        bucket_threshold: usize,
        max_depth: usize,
        n_trees: usize,
    },
}

impl IndexConfig {
    pub fn dim(&self) -> usize {
        match *self {
            IndexConfig::Hnsw { dim, .. }
            | IndexConfig::Vamana { dim, .. }
            | IndexConfig::Ivf { dim, .. }
            | IndexConfig::Annoy { dim, .. } => dim,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IndexConfig::Hnsw { .. } => "hnsw",
            IndexConfig::Vamana { .. } => "vamana",
            IndexConfig::Ivf { .. } => "ivf",
            IndexConfig::Annoy { .. } => "annoy",
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        let fail = |message: String| Err(EngineError::InvalidParams(message));
        if self.dim() == 0 {
            return fail("dimension must be at least 1".into());
        }
        match *self {
            IndexConfig::Hnsw {
                ml,
                num_layers,
                efc,
                ..
            } => {
                if !(ml > 0.0 && ml <= 1.0) {
                    return fail(format!("mL must be in (0, 1], got {}", ml));
                }
                if num_layers == 0 {
                    return fail("num_layers must be at least 1".into());
                }
                if efc == 0 {
                    return fail("efc must be at least 1".into());
                }
            }
            IndexConfig::Vamana { r, alpha, .. } => {
                if r == 0 {
                    return fail("R must be at least 1".into());
                }
                if !(alpha >= 1.0) {
                    return fail(format!("alpha must be at least 1, got {}", alpha));
                }
            }
            IndexConfig::Ivf {
                num_centroids,
                retrain_threshold,
                ..
            } => {
                if num_centroids == 0 {
                    return fail("num_centroids must be at least 1".into());
                }
                if retrain_threshold == 0 {
                    return fail("retrain_threshold must be at least 1".into());
                }
            }
            IndexConfig::Annoy {
                threshold,
                bucket_threshold,
                n_trees,
                ..
            } => {
                if threshold.is_nan() || threshold < 0.0 {
                    return fail(format!("threshold must be non-negative, got {}", threshold));
                }
                if bucket_threshold == 0 {
                    return fail("bucket_threshold must be at least 1".into());
                }
                if n_trees == 0 {
                    return fail("n_trees must be at least 1".into());
                }
            }
        }
        Ok(())
    }
}

struct NamedIndex {
    kind: &'static str,
    dim: usize,
    index: Box<dyn VectorSearch<String> + Send>,
}

/// The catalog: collections plus named indices in a flat namespace.
#[derive(Default)]
pub struct Engine {
    collections: BTreeMap<String, Collection>,
    indices: BTreeMap<String, NamedIndex>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty collection. Reports `CollectionExists` when the name
    /// is taken; callers treat that as a non-fatal signal.
    pub fn create_collection(&mut self, name: &str, reserve: usize) -> Result<(), EngineError> {
        if self.collections.contains_key(name) {
            return Err(EngineError::CollectionExists(name.to_string()));
        }
        self.collections
            .insert(name.to_string(), Collection::with_capacity(reserve));
        tracing::info!(collection = name, "collection created");
        Ok(())
    }

    /// Remove a collection. Indices built over it keep their own snapshots
    /// and stay queryable.
    pub fn delete_collection(&mut self, name: &str) -> Result<(), EngineError> {
        self.collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::CollectionNotFound(name.to_string()))
    }

    /// Append a record, creating the collection when missing.
    pub fn add_to_collection(
        &mut self,
        name: &str,
        key: String,
        vector: Vec<f32>,
    ) -> Result<(), EngineError> {
        let collection = self
            .collections
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(collection = name, "auto-creating collection");
                Collection::with_capacity(DEFAULT_RESERVE)
            });

        match collection.dim {
            Some(expected) if expected != vector.len() => {
                return Err(EngineError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                });
            }
            None => collection.dim = Some(vector.len()),
            Some(_) => {}
        }
        collection.records.push(Record::new(key, vector));
        Ok(())
    }

    /// Remove the first record matching `key`.
    pub fn delete_from_collection(&mut self, name: &str, key: &str) -> Result<(), EngineError> {
        let collection = self
            .collections
            .get_mut(name)
            .ok_or_else(|| EngineError::CollectionNotFound(name.to_string()))?;
        let position = collection
            .records
            .iter()
            .position(|record| record.key == key)
            .ok_or_else(|| EngineError::RecordNotFound(key.to_string()))?;
        collection.records.remove(position);
        Ok(())
    }

    /// Exact top-`ef` scan of a raw collection by squared distance.
    pub fn query_collection(
        &self,
        name: &str,
        query: &[f32],
        ef: usize,
    ) -> Result<Vec<SearchHit<String>>, EngineError> {
        let collection = self
            .collections
            .get(name)
            .ok_or_else(|| EngineError::CollectionNotFound(name.to_string()))?;
        if let Some(expected) = collection.dim {
            if expected != query.len() {
                return Err(EngineError::DimensionMismatch {
                    expected,
                    got: query.len(),
                });
            }
        }

        let mut scored: Vec<(usize, f32)> = collection
            .records
            .iter()
            .enumerate()
            .map(|(idx, record)| (idx, l2_distance_squared(query, &record.vector)))
            .collect();
        if ef == 0 {
            return Ok(Vec::new());
        }
        if scored.len() > ef {
            scored.select_nth_unstable_by(ef - 1, |a, b| {
                a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal)
            });
            scored.truncate(ef);
        }
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        Ok(scored
            .into_iter()
            .map(|(idx, distance)| {
                let record = &collection.records[idx];
                SearchHit {
                    key: record.key.clone(),
                    distance,
                    vector: record.vector.clone(),
                }
            })
            .collect())
    }

    /// Build a named index over a snapshot of `collection`. The requested
    /// name is disambiguated with `_1`, `_2`, … when taken; the chosen name
    /// is returned.
    pub fn build_index(
        &mut self,
        collection: &str,
        name: &str,
        config: IndexConfig,
    ) -> Result<String, EngineError> {
        config.validate()?;
        let source = self
            .collections
            .get(collection)
            .ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;
        if let Some(expected) = source.dim {
            if expected != config.dim() {
                return Err(EngineError::DimensionMismatch {
                    expected,
                    got: config.dim(),
                });
            }
        }

        let snapshot = source.records.clone();
        let snapshot_len = snapshot.len();
        let index: Box<dyn VectorSearch<String> + Send> = match config {
            IndexConfig::Hnsw {
                ml,
                num_layers,
                efc,
                ..
            } => Box::new(Hnsw::build(
                snapshot,
                HnswParams {
                    ml,
                    num_layers,
                    efc,
                },
                None,
            )),
            IndexConfig::Vamana { r, alpha, .. } => Box::new(Vamana::build(
                snapshot,
                VamanaParams { alpha, r },
                None,
            )),
            IndexConfig::Ivf {
                num_centroids,
                retrain_threshold,
                ..
            } => Box::new(
                Ivf::build(
                    snapshot,
                    IvfParams {
                        num_centroids,
                        retrain_threshold,
                    },
                    None,
                )
                .map_err(|err: IvfError| EngineError::InvalidParams(err.to_string()))?,
            ),
            IndexConfig::Annoy {
                threshold,
                bucket_threshold,
                max_depth,
                n_trees,
                ..
            } => Box::new(AnnoyForest::build(
                snapshot,
                AnnoyParams {
                    threshold,
                    bucket_threshold,
                    max_depth,
                },
                n_trees,
                true,
                None,
            )),
        };

        let unique = self.disambiguate(name);
        tracing::info!(
            index = unique.as_str(),
            kind = config.kind(),
            collection,
            records = snapshot_len,
            "index built"
        );
        self.indices.insert(
            unique.clone(),
            NamedIndex {
                kind: config.kind(),
                dim: config.dim(),
                index,
            },
        );
        Ok(unique)
    }

    /// Top-`ef` query against a named index.
    pub fn query_index(
        &self,
        name: &str,
        query: &[f32],
        ef: usize,
    ) -> Result<Vec<SearchHit<String>>, EngineError> {
        let named = self
            .indices
            .get(name)
            .ok_or_else(|| EngineError::IndexNotFound(name.to_string()))?;
        if named.dim != query.len() {
            return Err(EngineError::DimensionMismatch {
                expected: named.dim,
                got: query.len(),
            });
        }
        Ok(named.index.search(query, ef))
    }

    pub fn list_collections(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    pub fn list_indices(&self) -> Vec<String> {
        self.indices.keys().cloned().collect()
    }

    /// Kind tag of a named index, mostly for logs and tests.
    pub fn index_kind(&self, name: &str) -> Option<&'static str> {
        self.indices.get(name).map(|named| named.kind)
    }

    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    fn disambiguate(&self, name: &str) -> String {
        if !self.indices.contains_key(name) {
            return name.to_string();
        }
        let mut counter = 1usize;
        loop {
            let candidate = format!("{}_{}", name, counter);
            if !self.indices.contains_key(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }
}
