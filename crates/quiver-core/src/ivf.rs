//! Inverted file index over k-means cells
//!
//! Records are clustered into `num_centroids` cells with Lloyd's algorithm;
//! the model retrains after a configurable number of additions.
//!
//! Known defect, kept deliberately: queries do not probe cells. They scan the
//! whole snapshot and select the top `k` by squared distance, exactly as the
//! engine's prior implementation did, so the cell structure currently only
//! pays off through `cells()` introspection and future probing work. See
//! DESIGN.md.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::record::{Key, Record};
use crate::search::{SearchHit, VectorSearch};
use crate::simd::{l2_distance, l2_distance_squared};

/// Stop when no centroid moves at least this far (unsquared Euclidean)
/// during an update step.
const CONVERGENCE_THRESHOLD: f32 = 0.001;

/// Hard cap on Lloyd rounds per retrain; k-means converges long before this
/// on any realistic snapshot, the cap only bounds pathological oscillation.
const MAX_LLOYD_ROUNDS: usize = 100;

#[derive(Error, Debug)]
pub enum IvfError {
    #[error("snapshot of {count} records cannot seed {centroids} centroids")]
    InsufficientData { count: usize, centroids: usize },

    #[error("record dimension {got} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Build-time parameters.
#[derive(Debug, Clone, Copy)]
pub struct IvfParams {
    pub num_centroids: usize,
    /// Additions accumulated before the model retrains.
    pub retrain_threshold: usize,
}

/// K-means inverted file index.
pub struct Ivf<K> {
    records: Vec<Record<K>>,
    centroids: Vec<Vec<f32>>,
    /// Record indices assigned to each centroid's cell.
    cells: Vec<Vec<u32>>,
    params: IvfParams,
    dim: usize,
    adds_since_retrain: usize,
}

impl<K: Key> Ivf<K> {
    /// Cluster `records` into `num_centroids` cells.
    pub fn build(
        records: Vec<Record<K>>,
        params: IvfParams,
        seed: Option<u64>,
    ) -> Result<Self, IvfError> {
        if records.len() < params.num_centroids {
            return Err(IvfError::InsufficientData {
                count: records.len(),
                centroids: params.num_centroids,
            });
        }

        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        // Initial centroids are distinct random records.
        let picks = rand::seq::index::sample(&mut rng, records.len(), params.num_centroids);
        let centroids: Vec<Vec<f32>> = picks.iter().map(|i| records[i].vector.clone()).collect();

        let dim = records.first().map(|r| r.dim()).unwrap_or(0);
        let mut index = Self {
            records,
            centroids,
            cells: vec![Vec::new(); params.num_centroids],
            params,
            dim,
            adds_since_retrain: 0,
        };
        index.retrain();
        Ok(index)
    }

    /// Append a record; retrains once `retrain_threshold` additions have
    /// accumulated.
    pub fn add(&mut self, record: Record<K>) -> Result<(), IvfError> {
        if record.dim() != self.dim {
            return Err(IvfError::DimensionMismatch {
                expected: self.dim,
                got: record.dim(),
            });
        }
        self.records.push(record);
        self.adds_since_retrain += 1;
        if self.adds_since_retrain >= self.params.retrain_threshold {
            self.retrain();
            self.adds_since_retrain = 0;
        }
        Ok(())
    }

    /// Lloyd rounds until a full pass neither changes any cell's population
    /// nor moves a centroid by `CONVERGENCE_THRESHOLD` or more.
    fn retrain(&mut self) {
        for round in 0..MAX_LLOYD_ROUNDS {
            let assignments_changed = self.assign_cells();
            let centroids_moved = self.update_centroids();
            if !assignments_changed && !centroids_moved {
                tracing::debug!(rounds = round + 1, "ivf retrain converged");
                return;
            }
        }
        tracing::warn!(
            rounds = MAX_LLOYD_ROUNDS,
            "ivf retrain stopped at round cap"
        );
    }

    /// Reassign every record to its nearest centroid. Change is detected by
    /// comparing cell population counts against the previous pass.
    fn assign_cells(&mut self) -> bool {
        let mut new_cells = vec![Vec::new(); self.params.num_centroids];
        for (idx, record) in self.records.iter().enumerate() {
            let cell = self.nearest_centroid(&record.vector);
            new_cells[cell].push(idx as u32);
        }

        let changed = new_cells
            .iter()
            .zip(self.cells.iter())
            .any(|(new, old)| new.len() != old.len());
        self.cells = new_cells;
        changed
    }

    /// Recompute each centroid as its cell's mean; empty cells keep their
    /// centroid. Reports whether anything moved past the threshold.
    fn update_centroids(&mut self) -> bool {
        let mut moved = false;
        for (cell, centroid) in self.cells.iter().zip(self.centroids.iter_mut()) {
            if cell.is_empty() {
                continue;
            }
            let mut updated = vec![0.0f32; self.dim];
            for &idx in cell {
                for (slot, value) in updated.iter_mut().zip(&self.records[idx as usize].vector) {
                    *slot += value;
                }
            }
            let count = cell.len() as f32;
            for slot in updated.iter_mut() {
                *slot /= count;
            }

            if l2_distance(centroid, &updated) >= CONVERGENCE_THRESHOLD {
                *centroid = updated;
                moved = true;
            }
        }
        moved
    }

    fn nearest_centroid(&self, vector: &[f32]) -> usize {
        let mut best = 0usize;
        let mut best_distance = f32::MAX;
        for (idx, centroid) in self.centroids.iter().enumerate() {
            let distance = l2_distance_squared(vector, centroid);
            if distance < best_distance {
                best_distance = distance;
                best = idx;
            }
        }
        best
    }

    /// Top-`k` records by squared distance over the whole snapshot.
    pub fn query(&self, query: &[f32], k: usize) -> Vec<SearchHit<K>> {
        if k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(u32, f32)> = self
            .records
            .iter()
            .enumerate()
            .map(|(idx, record)| (idx as u32, l2_distance_squared(query, &record.vector)))
            .collect();

        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, |a, b| {
                a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal)
            });
            scored.truncate(k);
        }
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        scored
            .into_iter()
            .map(|(idx, distance)| {
                let record = &self.records[idx as usize];
                SearchHit {
                    key: record.key.clone(),
                    distance,
                    vector: record.vector.clone(),
                }
            })
            .collect()
    }

    /// Centroid vectors after the latest retrain.
    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }

    /// Record indices grouped per cell.
    pub fn cells(&self) -> &[Vec<u32>] {
        &self.cells
    }
}

impl<K: Key> VectorSearch<K> for Ivf<K> {
    fn search(&self, query: &[f32], ef: usize) -> Vec<SearchHit<K>> {
        self.query(query, ef)
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
