//! Vamana: single-layer directed proximity graph with robust pruning
//!
//! Build protocol: every node starts with `R` random out-edges, the medoid of
//! the snapshot becomes the fixed start node, then one refinement pass per
//! node replaces its out-neighborhood with the α-pruned visited set of a
//! greedy search toward it. Queries run the shared beam search over outgoing
//! edges from the medoid.
//!
//! The refinement pass also re-prunes *inbound* neighborhoods through each
//! node's incoming list, which is how the engine's prior implementation
//! behaved; see DESIGN.md for why that asymmetric step is preserved.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::distance::{Distance, SquaredEuclidean};
use crate::record::{mean_vector, Key, Record};
use crate::search::{beam_search, SearchHit, VectorSearch};
use crate::simd::l2_distance_squared;

/// Build-time parameters.
#[derive(Debug, Clone, Copy)]
pub struct VamanaParams {
    /// Pruning slack; a kept neighbor suppresses candidates within its
    /// distance scaled by `alpha`.
    pub alpha: f32,
    /// Maximum out-degree.
    pub r: usize,
}

struct VamanaNode<K> {
    record: Record<K>,
    outgoing: Vec<u32>,
    incoming: Vec<u32>,
}

/// Directed proximity graph searched from its medoid.
pub struct Vamana<K, D = SquaredEuclidean> {
    nodes: Vec<VamanaNode<K>>,
    start: u32,
    params: VamanaParams,
    dist: D,
}

impl<K: Key> Vamana<K, SquaredEuclidean> {
    pub fn build(records: Vec<Record<K>>, params: VamanaParams, seed: Option<u64>) -> Self {
        Self::build_with_distance(records, params, SquaredEuclidean, seed)
    }
}

impl<K: Key, D: Distance> Vamana<K, D> {
    pub fn build_with_distance(
        records: Vec<Record<K>>,
        params: VamanaParams,
        dist: D,
        seed: Option<u64>,
    ) -> Self {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let nodes: Vec<VamanaNode<K>> = records
            .into_iter()
            .map(|record| VamanaNode {
                record,
                outgoing: Vec::new(),
                incoming: Vec::new(),
            })
            .collect();

        let mut graph = Self {
            start: 0,
            nodes,
            params,
            dist,
        };
        if graph.nodes.is_empty() {
            return graph;
        }

        graph.start = graph.find_medoid();
        graph.wire_random_edges(&mut rng);
        graph.refine();
        graph
    }

    /// The record whose vector is closest to the arithmetic mean of the
    /// snapshot.
    fn find_medoid(&self) -> u32 {
        let mean = mean_vector(self.nodes.iter().map(|node| node.record.vector.as_slice()))
            .expect("medoid of non-empty snapshot");

        let mut best = 0u32;
        let mut best_distance = f32::MAX;
        for (idx, node) in self.nodes.iter().enumerate() {
            let distance = l2_distance_squared(&node.record.vector, &mean);
            if distance < best_distance {
                best_distance = distance;
                best = idx as u32;
            }
        }
        best
    }

    /// Give every node `R` random distinct out-neighbors (fewer when the
    /// snapshot is small), tracking the reverse direction in `incoming`.
    fn wire_random_edges(&mut self, rng: &mut StdRng) {
        let n = self.nodes.len();
        for idx in 0..n as u32 {
            let want = self.params.r.min(n.saturating_sub(1));
            let mut picks = rand::seq::index::sample(rng, n, (want + 1).min(n)).into_vec();
            picks.retain(|&p| p as u32 != idx);
            picks.truncate(want);

            for pick in picks {
                self.nodes[idx as usize].outgoing.push(pick as u32);
                self.nodes[pick].incoming.push(idx);
            }
        }
    }

    /// One pass over every node: greedy-search toward its own vector from
    /// the start node, robust-prune its out-neighborhood against the visited
    /// set, then revisit inbound neighborhoods that exceed the degree bound.
    fn refine(&mut self) {
        for idx in 0..self.nodes.len() as u32 {
            let target = self.nodes[idx as usize].record.vector.clone();
            let visited = self.greedy_visited(&target);
            self.robust_prune(idx, visited);

            let inbound = self.nodes[idx as usize].incoming.clone();
            for y in inbound {
                if self.nodes[y as usize].incoming.len() > self.params.r {
                    let mut candidates = self.nodes[y as usize].incoming.clone();
                    candidates.push(idx);
                    self.robust_prune(y, candidates);
                } else {
                    self.nodes[y as usize].incoming.push(idx);
                }
            }
        }
    }

    /// Visited set of a greedy (ef=1) search from the start node.
    fn greedy_visited(&self, target: &[f32]) -> Vec<u32> {
        beam_search(
            self.start,
            1,
            self.nodes.len(),
            |idx| {
                self.dist
                    .distance(target, &self.nodes[idx as usize].record.vector)
            },
            |idx| self.nodes[idx as usize].outgoing.as_slice(),
        )
        .visited
    }

    /// Rebuild `x`'s out-neighborhood from `candidates ∪ old outgoing`:
    /// repeatedly keep the closest remaining candidate and drop everything it
    /// dominates under the α criterion, until `R` neighbors are kept or the
    /// pool runs dry.
    fn robust_prune(&mut self, x: u32, candidates: Vec<u32>) {
        let x_vector = self.nodes[x as usize].record.vector.clone();

        let mut pool: Vec<u32> = candidates;
        pool.extend_from_slice(&self.nodes[x as usize].outgoing);
        pool.sort_unstable();
        pool.dedup();
        pool.retain(|&p| p != x);

        let mut scored: Vec<(u32, f32)> = pool
            .into_iter()
            .map(|p| {
                (
                    p,
                    self.dist
                        .distance(&self.nodes[p as usize].record.vector, &x_vector),
                )
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        let alpha = self.params.alpha;
        let max_degree = self.params.r;
        let kept = &mut self.nodes[x as usize];
        kept.outgoing.clear();

        while !scored.is_empty() && kept.outgoing.len() < max_degree {
            let (closest, closest_distance) = scored.remove(0);
            kept.outgoing.push(closest);
            scored.retain(|&(_, d)| alpha * d > closest_distance);
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn start_node(&self) -> u32 {
        self.start
    }

    pub fn outgoing_of(&self, node: u32) -> &[u32] {
        &self.nodes[node as usize].outgoing
    }

    pub fn record(&self, node: u32) -> &Record<K> {
        &self.nodes[node as usize].record
    }
}

impl<K: Key, D: Distance> VectorSearch<K> for Vamana<K, D> {
    fn search(&self, query: &[f32], ef: usize) -> Vec<SearchHit<K>> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        beam_search(
            self.start,
            ef,
            self.nodes.len(),
            |idx| {
                self.dist
                    .distance(query, &self.nodes[idx as usize].record.vector)
            },
            |idx| self.nodes[idx as usize].outgoing.as_slice(),
        )
        .nearest
        .into_iter()
        .map(|(idx, distance)| {
            let record = &self.nodes[idx as usize].record;
            SearchHit {
                key: record.key.clone(),
                distance,
                vector: record.vector.clone(),
            }
        })
        .collect()
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }
}
