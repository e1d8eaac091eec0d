//! Random-projection binary tree
//!
//! Each internal node holds two pivot vectors drawn from the subset it was
//! built over; records go to the side of the nearer pivot. Queries descend
//! from the root, following the nearer side, and descend into *both* children
//! when the query lies within `threshold` of the bisecting boundary. The
//! threshold widens an ambiguity cone around the split plane, trading extra
//! leaf scans for recall.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::Rng;

use crate::record::Record;
use crate::simd::l2_distance_squared;

/// How many times pivot selection redraws the second index while the two
/// pivot vectors compare equal.
const PIVOT_RETRIES: usize = 5;

/// Build-time knobs shared by every tree in a forest.
#[derive(Debug, Clone, Copy)]
pub struct AnnoyParams {
    /// Ambiguity cone: descend both sides when `|d1 - d2| < threshold`.
    pub threshold: f32,
    /// Subsets at or below this size become leaves.
    pub bucket_threshold: usize,
    /// Depth beyond which subsets become leaves regardless of size.
    pub max_depth: usize,
}

enum TreeNode<K> {
    Split {
        pivot_a: Vec<f32>,
        pivot_b: Vec<f32>,
        left: Option<u32>,
        right: Option<u32>,
    },
    Leaf {
        bucket: Vec<Record<K>>,
    },
}

/// One space-partitioning tree over a snapshot of records.
pub struct AnnoyTree<K> {
    nodes: Vec<TreeNode<K>>,
    threshold: f32,
}

impl<K: Clone> AnnoyTree<K> {
    /// Build a tree by recursively splitting `records`.
    ///
    /// The build is an explicit work stack of (arena slot, subset, depth)
    /// tasks; recursion depth is bounded only by `max_depth`, which can be
    /// large, so the stack lives on the heap.
    pub fn build(records: Vec<Record<K>>, params: &AnnoyParams, rng: &mut StdRng) -> Self {
        let mut nodes = Vec::new();
        nodes.push(TreeNode::Leaf { bucket: Vec::new() });

        let mut tasks: Vec<(u32, Vec<Record<K>>, usize)> = vec![(0, records, 0)];

        while let Some((slot, subset, depth)) = tasks.pop() {
            if subset.len() <= params.bucket_threshold || depth > params.max_depth {
                nodes[slot as usize] = TreeNode::Leaf { bucket: subset };
                continue;
            }

            let (pivot_a, pivot_b) = select_pivots(&subset, rng);
            let (left_data, right_data) = split_records(subset, &pivot_a, &pivot_b, rng);

            let left = if left_data.is_empty() {
                None
            } else {
                let child = nodes.len() as u32;
                nodes.push(TreeNode::Leaf { bucket: Vec::new() });
                tasks.push((child, left_data, depth + 1));
                Some(child)
            };
            let right = if right_data.is_empty() {
                None
            } else {
                let child = nodes.len() as u32;
                nodes.push(TreeNode::Leaf { bucket: Vec::new() });
                tasks.push((child, right_data, depth + 1));
                Some(child)
            };

            nodes[slot as usize] = TreeNode::Split {
                pivot_a,
                pivot_b,
                left,
                right,
            };
        }

        Self {
            nodes,
            threshold: params.threshold,
        }
    }

    /// Candidate records for `query`: breadth-first descent, appending every
    /// reached leaf bucket.
    pub fn candidates(&self, query: &[f32]) -> Vec<&Record<K>> {
        let mut results = Vec::new();
        let mut pending = VecDeque::new();
        pending.push_back(0u32);

        while let Some(idx) = pending.pop_front() {
            match &self.nodes[idx as usize] {
                TreeNode::Leaf { bucket } => results.extend(bucket.iter()),
                TreeNode::Split {
                    pivot_a,
                    pivot_b,
                    left,
                    right,
                } => {
                    let d1 = l2_distance_squared(query, pivot_a);
                    let d2 = l2_distance_squared(query, pivot_b);
                    if (d1 - d2).abs() < self.threshold {
                        pending.extend(left.iter().chain(right.iter()));
                    } else {
                        let (near, far) = if d1 < d2 { (left, right) } else { (right, left) };
                        // A lone child holds the entire subset.
                        match near {
                            Some(child) => pending.push_back(*child),
                            None => pending.extend(far.iter()),
                        }
                    }
                }
            }
        }

        results
    }

    /// The full multiset of records stored in the tree, gathered
    /// depth-first from its leaves.
    pub fn reconstruct(&self) -> Vec<Record<K>> {
        let mut dataset = Vec::new();
        let mut pending = vec![0u32];
        while let Some(idx) = pending.pop() {
            match &self.nodes[idx as usize] {
                TreeNode::Leaf { bucket } => dataset.extend(bucket.iter().cloned()),
                TreeNode::Split { left, right, .. } => {
                    pending.extend(right.iter().chain(left.iter()))
                }
            }
        }
        dataset
    }
}

fn select_pivots<K>(subset: &[Record<K>], rng: &mut StdRng) -> (Vec<f32>, Vec<f32>) {
    let i = rng.gen_range(0..subset.len());
    let mut j = rng.gen_range(0..subset.len());
    for _ in 0..PIVOT_RETRIES {
        if subset[i].vector != subset[j].vector {
            break;
        }
        j = rng.gen_range(0..subset.len());
    }
    (subset[i].vector.clone(), subset[j].vector.clone())
}

#[allow(clippy::type_complexity)]
fn split_records<K>(
    records: Vec<Record<K>>,
    pivot_a: &[f32],
    pivot_b: &[f32],
    rng: &mut StdRng,
) -> (Vec<Record<K>>, Vec<Record<K>>) {
    let mut left = Vec::new();
    let mut right = Vec::new();

    if pivot_a == pivot_b {
        // Degenerate pivots (duplicate-heavy subsets): split uniformly.
        for record in records {
            if rng.gen::<bool>() {
                left.push(record);
            } else {
                right.push(record);
            }
        }
    } else {
        for record in records {
            let da = l2_distance_squared(&record.vector, pivot_a);
            let db = l2_distance_squared(&record.vector, pivot_b);
            if da <= db {
                left.push(record);
            } else {
                right.push(record);
            }
        }
    }

    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn sample_records(n: usize, dim: usize, seed: u64) -> Vec<Record<String>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                Record::new(
                    format!("r{}", i),
                    (0..dim).map(|_| rng.gen::<f32>()).collect(),
                )
            })
            .collect()
    }

    fn params(threshold: f32) -> AnnoyParams {
        AnnoyParams {
            threshold,
            bucket_threshold: 4,
            max_depth: 16,
        }
    }

    #[test]
    fn test_reconstruct_preserves_records() {
        let records = sample_records(200, 8, 11);
        let mut rng = StdRng::seed_from_u64(12);
        let tree = AnnoyTree::build(records.clone(), &params(0.0), &mut rng);

        let mut rebuilt: Vec<String> = tree.reconstruct().into_iter().map(|r| r.key).collect();
        let mut original: Vec<String> = records.into_iter().map(|r| r.key).collect();
        rebuilt.sort();
        original.sort();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_infinite_threshold_reaches_every_leaf() {
        let records = sample_records(100, 4, 3);
        let mut rng = StdRng::seed_from_u64(4);
        let tree = AnnoyTree::build(records.clone(), &params(f32::INFINITY), &mut rng);

        let candidates = tree.candidates(&records[0].vector);
        assert_eq!(candidates.len(), records.len());
    }

    #[test]
    fn test_duplicate_vectors_still_split() {
        // All vectors identical: pivots degenerate, split must go random and
        // the build must still terminate with every record in some leaf.
        let records: Vec<Record<String>> = (0..64)
            .map(|i| Record::new(format!("dup{}", i), vec![1.0, 2.0, 3.0]))
            .collect();
        let mut rng = StdRng::seed_from_u64(9);
        let tree = AnnoyTree::build(
            records.clone(),
            &AnnoyParams {
                threshold: 0.0,
                bucket_threshold: 4,
                max_depth: 10,
            },
            &mut rng,
        );
        assert_eq!(tree.reconstruct().len(), records.len());
    }

    #[test]
    fn test_candidates_nonempty_for_any_query() {
        let records = sample_records(50, 6, 21);
        let mut rng = StdRng::seed_from_u64(22);
        let tree = AnnoyTree::build(records, &params(0.01), &mut rng);

        let query = vec![0.5; 6];
        assert!(!tree.candidates(&query).is_empty());
    }

    #[test]
    fn test_bucket_threshold_respected_at_shallow_depth() {
        let records = sample_records(32, 4, 31);
        let mut rng = StdRng::seed_from_u64(32);
        let tree = AnnoyTree::build(
            records,
            &AnnoyParams {
                threshold: 0.0,
                bucket_threshold: 32,
                max_depth: 8,
            },
            &mut rng,
        );
        // Whole snapshot fits the bucket: the tree is a single leaf.
        assert_eq!(tree.nodes.len(), 1);
    }
}
