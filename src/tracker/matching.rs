//! Query-to-target correspondence and the matcher seam used in training.

use ndarray::{Array1, Array2, ArrayView2, ArrayView3, Axis};

use crate::error::{Result, TrackError};

/// Ground-truth instance present on a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetInstance {
    /// Sequence-stable target id
    pub id: i64,
    /// Class label, indexing the foreground columns of the class logits
    pub label: usize,
}

/// Ordered `(query index, target id)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Correspondence {
    pairs: Vec<(usize, i64)>,
}

impl Correspondence {
    pub fn new(mut pairs: Vec<(usize, i64)>) -> Self {
        pairs.sort_by_key(|&(q, _)| q);
        Self { pairs }
    }

    pub fn pairs(&self) -> &[(usize, i64)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn target_of(&self, query: usize) -> Option<i64> {
        self.pairs.iter().find(|&&(q, _)| q == query).map(|&(_, t)| t)
    }

    pub fn contains_target(&self, target: i64) -> bool {
        self.pairs.iter().any(|&(_, t)| t == target)
    }

    /// Dense per-query view of length `num_queries`.
    pub fn targets_per_query(&self, num_queries: usize) -> Vec<Option<i64>> {
        let mut dense = vec![None; num_queries];
        for &(q, t) in &self.pairs {
            if q < num_queries {
                dense[q] = Some(t);
            }
        }
        dense
    }
}

/// Final-layer predictions of one frame.
#[derive(Debug, Clone, Copy)]
pub struct FramePrediction<'a> {
    /// queries x (classes + 1)
    pub logits: ArrayView2<'a, f32>,
    /// queries x height x width
    pub masks: ArrayView3<'a, f32>,
}

/// Assigns refined queries to ground-truth targets.
pub trait Matcher {
    /// `previous` holds the correspondence of the track slots carried into this
    /// frame, indexed by slot position.
    fn assign(
        &mut self,
        prediction: &FramePrediction<'_>,
        targets: &[TargetInstance],
        previous: &Correspondence,
    ) -> Result<Correspondence>;
}

/// Row-wise softmax.
pub fn class_probabilities(logits: ArrayView2<f32>) -> Array2<f32> {
    let mut probs = logits.to_owned();
    for mut row in probs.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|x| x / sum);
    }
    probs
}

/// Highest foreground probability per query; the last column is background.
pub fn foreground_scores(logits: ArrayView2<f32>) -> Array1<f32> {
    let probs = class_probabilities(logits);
    let num_fg = probs.ncols().saturating_sub(1);
    probs.map_axis(Axis(1), |row| {
        row.iter()
            .take(num_fg)
            .fold(0.0f32, |m, &p| m.max(p))
    })
}

#[derive(Debug, Clone)]
pub struct AssignmentResult {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_rows: Vec<usize>,
    pub unmatched_cols: Vec<usize>,
}

/// Minimum-cost assignment of rows to columns; pairs costing more than
/// `thresh` are left unmatched.
pub fn linear_assignment(cost_matrix: &Array2<f32>, thresh: f32) -> Result<AssignmentResult> {
    let (num_rows, num_cols) = cost_matrix.dim();

    if num_rows == 0 || num_cols == 0 {
        return Ok(AssignmentResult {
            matches: vec![],
            unmatched_rows: (0..num_rows).collect(),
            unmatched_cols: (0..num_cols).collect(),
        });
    }

    let size = num_rows.max(num_cols);
    let mut padded = Array2::<f64>::from_elem((size, size), 1e6);
    padded
        .slice_mut(ndarray::s![..num_rows, ..num_cols])
        .assign(&cost_matrix.mapv(f64::from));

    let (row_to_col, _) =
        lapjv::lapjv(&padded).map_err(|e| TrackError::Assignment(format!("{e:?}")))?;

    let mut matches = vec![];
    let mut unmatched_rows = vec![];
    let mut col_free = vec![true; num_cols];
    for (row, &col) in row_to_col.iter().enumerate().take(num_rows) {
        if col < num_cols && cost_matrix[[row, col]] <= thresh {
            matches.push((row, col));
            col_free[col] = false;
        } else {
            unmatched_rows.push(row);
        }
    }

    let unmatched_cols = col_free
        .iter()
        .enumerate()
        .filter_map(|(c, &free)| free.then_some(c))
        .collect();

    Ok(AssignmentResult {
        matches,
        unmatched_rows,
        unmatched_cols,
    })
}

/// Matcher keeping the previous frame's correspondences whose targets are still
/// present and assigning the rest by class probability.
#[derive(Debug, Clone, Default)]
pub struct ClassCostMatcher {
    /// Assignments costing more than this are rejected
    pub max_cost: Option<f32>,
}

impl Matcher for ClassCostMatcher {
    fn assign(
        &mut self,
        prediction: &FramePrediction<'_>,
        targets: &[TargetInstance],
        previous: &Correspondence,
    ) -> Result<Correspondence> {
        let num_queries = prediction.logits.nrows();
        let num_fg = prediction.logits.ncols().saturating_sub(1);
        let probs = class_probabilities(prediction.logits);

        let mut pairs = Vec::new();
        let mut query_free = vec![true; num_queries];
        let mut target_free = vec![true; targets.len()];

        for &(q, t) in previous.pairs() {
            let Some(ti) = targets.iter().position(|x| x.id == t) else {
                continue;
            };
            if q < num_queries && query_free[q] && target_free[ti] {
                pairs.push((q, t));
                query_free[q] = false;
                target_free[ti] = false;
            }
        }

        let rows: Vec<usize> = (0..num_queries).filter(|&q| query_free[q]).collect();
        let cols: Vec<usize> = (0..targets.len()).filter(|&t| target_free[t]).collect();
        let cost = Array2::from_shape_fn((rows.len(), cols.len()), |(r, c)| {
            let label = targets[cols[c]].label;
            if label < num_fg { 1.0 - probs[[rows[r], label]] } else { 1.0 }
        });

        let result = linear_assignment(&cost, self.max_cost.unwrap_or(f32::INFINITY))?;
        pairs.extend(
            result
                .matches
                .into_iter()
                .map(|(r, c)| (rows[r], targets[cols[c]].id)),
        );

        Ok(Correspondence::new(pairs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array3, array};

    #[test]
    fn test_foreground_scores_skip_background() {
        let logits = array![[0.0, 0.0, 10.0], [3.0, 0.0, 0.0]];
        let scores = foreground_scores(logits.view());
        assert!(scores[0] < 0.001);
        assert!(scores[1] > 0.9);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let probs = class_probabilities(array![[1.0, 2.0, 3.0]].view());
        assert_relative_eq!(probs.sum(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_linear_assignment_rectangular() {
        let cost = array![[0.9, 0.1], [0.2, 0.8], [0.5, 0.5]];
        let result = linear_assignment(&cost, 1.0).unwrap();
        assert_eq!(result.matches, vec![(0, 1), (1, 0)]);
        assert_eq!(result.unmatched_rows, vec![2]);
        assert!(result.unmatched_cols.is_empty());
    }

    #[test]
    fn test_linear_assignment_empty() {
        let cost = Array2::<f32>::zeros((0, 3));
        let result = linear_assignment(&cost, 1.0).unwrap();
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_cols, vec![0, 1, 2]);
    }

    #[test]
    fn test_class_matcher_keeps_previous_pairs() {
        // query 0 prefers label 1, query 1 prefers label 0
        let logits = array![[0.0, 5.0, 0.0], [5.0, 0.0, 0.0], [0.0, 0.0, 5.0]];
        let masks = Array3::zeros((3, 1, 1));
        let prediction = FramePrediction {
            logits: logits.view(),
            masks: masks.view(),
        };
        let targets = [
            TargetInstance { id: 7, label: 0 },
            TargetInstance { id: 9, label: 1 },
        ];

        let fresh = ClassCostMatcher::default()
            .assign(&prediction, &targets, &Correspondence::default())
            .unwrap();
        assert_eq!(fresh.pairs(), &[(0, 9), (1, 7)]);

        // a carried slot keeps its target even against the class evidence
        let previous = Correspondence::new(vec![(0, 7)]);
        let kept = ClassCostMatcher::default()
            .assign(&prediction, &targets, &previous)
            .unwrap();
        assert_eq!(kept.target_of(0), Some(7));
        assert!(kept.contains_target(9));
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_targets_per_query() {
        let c = Correspondence::new(vec![(2, 4), (0, 1)]);
        assert_eq!(c.pairs(), &[(0, 1), (2, 4)]);
        assert_eq!(c.targets_per_query(3), vec![Some(1), None, Some(4)]);
    }
}
