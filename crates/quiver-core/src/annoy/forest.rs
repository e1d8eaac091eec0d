//! Annoy forest: independent trees queried together
//!
//! Each tree is built over the same snapshot with independent randomness, so
//! their split planes differ and their candidate sets complement each other.
//! A query unions the candidates from every tree and keeps the top `ef` by
//! squared distance.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::record::{Key, Record};
use crate::search::{SearchHit, VectorSearch};
use crate::simd::l2_distance_squared;

use super::tree::{AnnoyParams, AnnoyTree};

/// A forest of random-projection trees.
pub struct AnnoyForest<K> {
    trees: Vec<AnnoyTree<K>>,
    record_count: usize,
    parallel: bool,
}

impl<K: Key> AnnoyForest<K> {
    /// Build `n_trees` independent trees over `records`.
    ///
    /// With `parallel`, tree builds fan out across the rayon pool; each task
    /// returns its finished tree and the calling thread collects them, so no
    /// partially-built forest is ever observable.
    pub fn build(
        records: Vec<Record<K>>,
        params: AnnoyParams,
        n_trees: usize,
        parallel: bool,
        seed: Option<u64>,
    ) -> Self {
        let record_count = records.len();
        let tree_rng = |i: usize| match seed {
            Some(s) => StdRng::seed_from_u64(s.wrapping_add(i as u64)),
            None => StdRng::from_entropy(),
        };

        let trees: Vec<AnnoyTree<K>> = if parallel {
            (0..n_trees)
                .into_par_iter()
                .map(|i| {
                    let mut rng = tree_rng(i);
                    AnnoyTree::build(records.clone(), &params, &mut rng)
                })
                .collect()
        } else {
            (0..n_trees)
                .map(|i| {
                    let mut rng = tree_rng(i);
                    AnnoyTree::build(records.clone(), &params, &mut rng)
                })
                .collect()
        };

        tracing::debug!(
            trees = trees.len(),
            records = record_count,
            "annoy forest built"
        );

        Self {
            trees,
            record_count,
            parallel,
        }
    }

    /// Top-`k` records by squared distance among the union of every tree's
    /// candidate list. A forest built in parallel also scores its trees in
    /// parallel.
    ///
    /// Candidates are *not* deduplicated across trees: a record living in
    /// reachable leaves of several trees can occupy several result slots.
    pub fn query(&self, query: &[f32], k: usize) -> Vec<SearchHit<K>> {
        let per_tree: Vec<Vec<(&Record<K>, f32)>> = if self.parallel {
            self.trees
                .par_iter()
                .map(|tree| score_tree(tree, query))
                .collect()
        } else {
            self.trees
                .iter()
                .map(|tree| score_tree(tree, query))
                .collect()
        };
        let mut scored: Vec<(&Record<K>, f32)> = per_tree.into_iter().flatten().collect();

        if k == 0 {
            return Vec::new();
        }
        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, |a, b| {
                a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal)
            });
            scored.truncate(k);
        }
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        scored
            .into_iter()
            .map(|(record, distance)| SearchHit {
                key: record.key.clone(),
                distance,
                vector: record.vector.clone(),
            })
            .collect()
    }
}

fn score_tree<'a, K: Clone>(tree: &'a AnnoyTree<K>, query: &[f32]) -> Vec<(&'a Record<K>, f32)> {
    tree.candidates(query)
        .into_iter()
        .map(|record| (record, l2_distance_squared(query, &record.vector)))
        .collect()
}

impl<K: Key> VectorSearch<K> for AnnoyForest<K> {
    fn search(&self, query: &[f32], ef: usize) -> Vec<SearchHit<K>> {
        self.query(query, ef)
    }

    fn len(&self) -> usize {
        self.record_count
    }
}
