//! Similarity-guided feature fusion over a bounded per-identity history.

use std::collections::VecDeque;

use ndarray::{Array1, ArrayView1};

/// Floor applied to vector norms before normalization.
const NORM_EPS: f32 = 1e-12;

/// Bounded FIFO history of feature vectors plus their fused representative.
#[derive(Debug, Clone)]
pub struct FusedFeature {
    history: VecDeque<Array1<f32>>,
    fused: Option<Array1<f32>>,
    capacity: usize,
}

impl FusedFeature {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity + 1),
            fused: None,
            capacity,
        }
    }

    /// Fold `value` into the representative and return the blend weight used.
    ///
    /// The weight is the mean cosine similarity between `value` and every
    /// vector already in the history, clamped below at zero. The first value
    /// seeds the representative directly and reports a weight of 1.
    pub fn update(&mut self, value: ArrayView1<f32>) -> f32 {
        let beta = match &self.fused {
            Some(_) if !self.history.is_empty() => {
                mean_cosine_similarity(self.history.iter().map(|h| h.view()), value).max(0.0)
            }
            // Seeded but nothing left to compare against (zero capacity).
            _ => 1.0,
        };
        self.blend(value, beta);
        self.record(value);
        beta
    }

    /// Blend `value` into the representative with an externally supplied weight.
    ///
    /// Used for a companion feature whose weight comes from another history.
    /// The history is left untouched.
    pub fn blend(&mut self, value: ArrayView1<f32>, beta: f32) {
        self.fused = Some(match self.fused.take() {
            Some(old) => old * (1.0 - beta) + &value * beta,
            None => value.to_owned(),
        });
    }

    /// Append to the history without touching the representative.
    pub fn record(&mut self, value: ArrayView1<f32>) {
        self.history.push_back(value.to_owned());
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
    }

    pub fn fused(&self) -> Option<&Array1<f32>> {
        self.fused.as_ref()
    }

    pub fn history(&self) -> impl Iterator<Item = &Array1<f32>> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn l2_normalized(v: ArrayView1<f32>) -> Array1<f32> {
    let norm = v.dot(&v).sqrt().max(NORM_EPS);
    &v / norm
}

/// Mean of the cosine similarities between `value` and each vector of `history`.
pub fn mean_cosine_similarity<'a>(
    history: impl Iterator<Item = ArrayView1<'a, f32>>,
    value: ArrayView1<f32>,
) -> f32 {
    let target = l2_normalized(value);
    let (sum, count) = history.fold((0.0f32, 0usize), |(sum, count), h| {
        (sum + l2_normalized(h).dot(&target), count + 1)
    });
    if count == 0 { 0.0 } else { sum / count as f32 }
}
