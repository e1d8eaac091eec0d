//! HNSW graph implementation
//!
//! Layered navigable small-world graph. Layers are indexed from the bottom:
//! an inserted point draws an insertion layer `l` from a geometric
//! distribution and is wired into every layer from `l` up to the top, so the
//! top layer contains every point and holds the entry node. This orientation
//! is inherited from the engine's prior implementation and is deliberately
//! kept (the textbook formulation uses the drawn layer as an upper bound).
//!
//! **Insert**: greedy single-best descent through layers below `l`, then a
//! beam search with `efc` candidates per layer from `l` upward, adding
//! symmetric edges to everything the beam returns.
//!
//! **Search**: greedy descent to the top layer, then one `ef`-wide beam
//! search there.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::distance::{Distance, SquaredEuclidean};
use crate::record::{Key, Record};
use crate::search::{beam_search, SearchHit, VectorSearch};

use super::node::HnswNode;

/// Build-time parameters.
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Layer-assignment scale in (0, 1]; larger values push points higher.
    pub ml: f64,
    /// Number of layers; the top layer (`num_layers - 1`) is the entry layer.
    pub num_layers: usize,
    /// Beam width while wiring a new point.
    pub efc: usize,
}

/// Hierarchical navigable small-world index.
pub struct Hnsw<K, D = SquaredEuclidean> {
    nodes: Vec<HnswNode<K>>,
    /// Per-layer membership rosters; `members[l][0]` of the top layer is the
    /// entry point (the first record inserted).
    members: Vec<Vec<u32>>,
    params: HnswParams,
    dist: D,
    rng: StdRng,
}

impl<K: Key> Hnsw<K, SquaredEuclidean> {
    /// Build with the default metric and a shuffled copy of `records`.
    pub fn build(records: Vec<Record<K>>, params: HnswParams, seed: Option<u64>) -> Self {
        Self::build_with_distance(records, params, SquaredEuclidean, seed)
    }
}

impl<K: Key, D: Distance> Hnsw<K, D> {
    pub fn build_with_distance(
        mut records: Vec<Record<K>>,
        params: HnswParams,
        dist: D,
        seed: Option<u64>,
    ) -> Self {
        let mut graph = Self {
            nodes: Vec::with_capacity(records.len()),
            members: vec![Vec::new(); params.num_layers],
            params,
            dist,
            rng: match seed {
                Some(s) => StdRng::seed_from_u64(s),
                None => StdRng::from_entropy(),
            },
        };

        // Insertion order shapes the graph; randomize it so sorted input
        // does not degenerate into a chain.
        records.shuffle(&mut graph.rng);
        for record in records {
            graph.insert(record);
        }
        graph
    }

    /// Insert one record, wiring it into layers `l..=top`.
    pub fn insert(&mut self, record: Record<K>) {
        let num_layers = self.params.num_layers;
        let idx = self.nodes.len() as u32;

        if self.nodes.is_empty() {
            self.nodes.push(HnswNode::new(record, num_layers));
            for roster in self.members.iter_mut() {
                roster.push(idx);
            }
            return;
        }

        let insertion_layer = self.draw_insertion_layer();
        let query = record.vector.clone();
        self.nodes.push(HnswNode::new(record, num_layers));

        let mut current = self.entry_point();
        for layer in 0..num_layers {
            if layer < insertion_layer {
                current = self.search_layer(layer, current, &query, 1)[0].0;
            } else {
                let nearest = self.search_layer(layer, current, &query, self.params.efc);
                for &(neighbor, _) in &nearest {
                    self.connect(layer, neighbor, idx);
                }
                current = nearest[0].0;
                self.members[layer].push(idx);
            }
        }
    }

    /// Top-`ef` nodes: greedy descent below the top layer, then one wide
    /// beam search across the top layer.
    pub fn search(&self, query: &[f32], ef: usize) -> Vec<(u32, f32)> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        let top = self.params.num_layers - 1;
        let mut current = self.entry_point();
        for layer in 0..top {
            current = self.search_layer(layer, current, query, 1)[0].0;
        }
        self.search_layer(top, current, query, ef)
    }

    fn search_layer(&self, layer: usize, start: u32, query: &[f32], ef: usize) -> Vec<(u32, f32)> {
        beam_search(
            start,
            ef,
            self.nodes.len(),
            |idx| {
                self.dist
                    .distance(query, &self.nodes[idx as usize].record.vector)
            },
            |idx| self.nodes[idx as usize].neighbors(layer),
        )
        .nearest
    }

    fn connect(&mut self, layer: usize, a: u32, b: u32) {
        self.nodes[a as usize].add_neighbor(layer, b);
        self.nodes[b as usize].add_neighbor(layer, a);
    }

    fn draw_insertion_layer(&mut self) -> usize {
        let r: f64 = self.rng.gen();
        let layer = (-r.ln() * self.params.ml).floor() as usize;
        layer.min(self.params.num_layers - 1)
    }

    fn entry_point(&self) -> u32 {
        self.members[self.params.num_layers - 1][0]
    }

    /// Number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Roster of nodes participating in a layer.
    pub fn layer_members(&self, layer: usize) -> &[u32] {
        &self.members[layer]
    }

    /// Adjacency of a node at a layer.
    pub fn neighbors_of(&self, node: u32, layer: usize) -> &[u32] {
        self.nodes[node as usize].neighbors(layer)
    }

    pub fn record(&self, node: u32) -> &Record<K> {
        &self.nodes[node as usize].record
    }

    /// Layer occupancy and edge totals, for logs and diagnostics.
    pub fn stats(&self) -> HnswStats {
        HnswStats {
            num_nodes: self.nodes.len(),
            layer_counts: self.members.iter().map(|roster| roster.len()).collect(),
            total_edges: self.nodes.iter().map(|node| node.degree()).sum::<usize>() / 2,
        }
    }
}

impl<K: Key, D: Distance> VectorSearch<K> for Hnsw<K, D> {
    fn search(&self, query: &[f32], ef: usize) -> Vec<SearchHit<K>> {
        Hnsw::search(self, query, ef)
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

/// Occupancy summary of an HNSW graph.
#[derive(Debug, Clone)]
pub struct HnswStats {
    pub num_nodes: usize,
    pub layer_counts: Vec<usize>,
    pub total_edges: usize,
}
