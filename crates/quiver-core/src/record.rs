//! Keyed vector records
//!
//! A [`Record`] is the unit stored in collections and captured into index
//! snapshots. Keys are caller-supplied opaque identifiers; the engine only
//! needs equality and hashing, and nothing requires them to be unique.

use std::hash::Hash;

/// Bound alias for record keys.
pub trait Key: Clone + Eq + Hash + Send + Sync {}

impl<T: Clone + Eq + Hash + Send + Sync> Key for T {}

/// A (key, vector) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<K> {
    pub key: K,
    pub vector: Vec<f32>,
}

impl<K> Record<K> {
    pub fn new(key: K, vector: Vec<f32>) -> Self {
        Self { key, vector }
    }

    /// Dimensionality of the stored vector.
    pub fn dim(&self) -> usize {
        self.vector.len()
    }
}

/// Arithmetic mean of a sequence of vectors, or `None` when empty.
pub fn mean_vector<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut iter = vectors.into_iter();
    let mut mean: Vec<f32> = iter.next()?.to_vec();
    let mut count = 1usize;
    for vector in iter {
        for (slot, value) in mean.iter_mut().zip(vector.iter()) {
            *slot += value;
        }
        count += 1;
    }
    let n = count as f32;
    for slot in mean.iter_mut() {
        *slot /= n;
    }
    Some(mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_vector() {
        let records = vec![
            Record::new("a", vec![0.0, 2.0]),
            Record::new("b", vec![2.0, 4.0]),
            Record::new("c", vec![4.0, 0.0]),
        ];
        let mean = mean_vector(records.iter().map(|r| r.vector.as_slice()));
        assert_eq!(mean, Some(vec![2.0, 2.0]));
    }

    #[test]
    fn test_mean_vector_empty() {
        assert_eq!(mean_vector(std::iter::empty::<&[f32]>()), None);
    }
}
