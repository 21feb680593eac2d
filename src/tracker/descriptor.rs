//! Mask-guided positional descriptor.
//!
//! Every query is compared against every spatial location of the mask-feature
//! map with a scaled bilinear affinity, the affinity is softmax-normalized over
//! locations (optionally restricted to the query's predicted mask) and the
//! mask features are read out with those weights.

use ndarray::{Array1, Array2, ArrayView2, ArrayView3, Axis, s};

use crate::error::{Result, TrackError};
use crate::integration::KeyProjection;
use crate::tracker::config::TrackerConfig;

/// Finite stand-in for negative infinity on suppressed locations.
pub const MASKED_AFFINITY: f32 = -1e6;
const SOFTMAX_EPS: f32 = 1e-8;

/// Per-frame key material, computed once and shared by every descriptor call
/// on that frame.
#[derive(Debug, Clone)]
pub struct MaskKeys {
    /// Projected keys, channels × locations
    keys: Array2<f32>,
    /// Squared L2 norm of each key column
    sq_norms: Array1<f32>,
    /// Raw mask features, channels × locations
    values: Array2<f32>,
    height: usize,
    width: usize,
}

impl MaskKeys {
    pub fn num_locations(&self) -> usize {
        self.values.ncols()
    }

    pub fn value_dim(&self) -> usize {
        self.values.nrows()
    }
}

#[derive(Debug, Clone)]
pub struct MaskDescriptor {
    hidden_dim: usize,
    chunk_size: usize,
    mask_threshold: f32,
    mask_out_background: bool,
}

impl MaskDescriptor {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            hidden_dim: config.hidden_dim,
            chunk_size: config.descriptor_chunk_size.max(1),
            mask_threshold: config.mask_threshold,
            mask_out_background: config.mask_out_background,
        }
    }

    pub fn with_gating(mut self, enabled: bool) -> Self {
        self.mask_out_background = enabled;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn prepare_keys<P: KeyProjection + ?Sized>(
        &self,
        projection: &P,
        mask_features: ArrayView3<f32>,
    ) -> Result<MaskKeys> {
        let (_, height, width) = mask_features.dim();
        let values = flatten_spatial(mask_features)?;

        let projected = projection.project_mask_features(mask_features);
        let (_, ph, pw) = projected.dim();
        if (ph, pw) != (height, width) {
            return Err(TrackError::shape(
                "projected mask features",
                format!("{height}x{width}"),
                format!("{ph}x{pw}"),
            ));
        }
        let keys = flatten_spatial(projected.view())?;
        let sq_norms = keys.map_axis(Axis(0), |col| col.dot(&col));

        Ok(MaskKeys {
            keys,
            sq_norms,
            values,
            height,
            width,
        })
    }

    /// Compute one descriptor row per query.
    ///
    /// `mask_logits`, when given, must hold one height × width logit map per
    /// query; locations whose probability does not exceed the threshold are
    /// suppressed before normalization.
    pub fn describe<P: KeyProjection + ?Sized>(
        &self,
        projection: &P,
        keys: &MaskKeys,
        queries: ArrayView2<f32>,
        mask_logits: Option<ArrayView3<f32>>,
    ) -> Result<Array2<f32>> {
        let num_queries = queries.nrows();
        let projected = projection.project_queries(queries);
        if projected.nrows() != num_queries || projected.ncols() != keys.keys.nrows() {
            return Err(TrackError::shape(
                "projected queries",
                format!("{num_queries}x{}", keys.keys.nrows()),
                format!("{}x{}", projected.nrows(), projected.ncols()),
            ));
        }

        let gate = match mask_logits {
            Some(masks) if self.mask_out_background => {
                let expected = (num_queries, keys.height, keys.width);
                if masks.dim() != expected {
                    return Err(TrackError::shape(
                        "descriptor mask logits",
                        format!("{expected:?}"),
                        format!("{:?}", masks.dim()),
                    ));
                }
                Some(masks)
            }
            _ => None,
        };

        let scale = (self.hidden_dim as f32).sqrt();
        let mut out = Array2::zeros((num_queries, keys.value_dim()));

        for start in (0..num_queries).step_by(self.chunk_size) {
            let end = (start + self.chunk_size).min(num_queries);
            let chunk = projected.slice(s![start..end, ..]);

            // locations x queries
            let mut affinity = keys.keys.t().dot(&chunk.t());
            for mut column in affinity.columns_mut() {
                column.zip_mut_with(&keys.sq_norms, |a, &sq| *a = (2.0 * *a - sq) / scale);
            }

            if let Some(masks) = &gate {
                for (j, mut column) in affinity.columns_mut().into_iter().enumerate() {
                    let mask = masks.index_axis(Axis(0), start + j);
                    for (a, &m) in column.iter_mut().zip(mask.iter()) {
                        if sigmoid(m) <= self.mask_threshold {
                            *a = MASKED_AFFINITY;
                        }
                    }
                }
            }

            softmax_over_locations(&mut affinity);

            let readout = keys.values.dot(&affinity);
            out.slice_mut(s![start..end, ..]).assign(&readout.t());
        }

        Ok(out)
    }
}

/// Column-wise softmax with per-column max subtraction.
pub fn softmax_over_locations(affinity: &mut Array2<f32>) {
    for mut column in affinity.columns_mut() {
        let max = column.fold(f32::NEG_INFINITY, |m, &a| m.max(a));
        column.mapv_inplace(|a| (a - max).exp());
        let sum = column.sum();
        column.mapv_inplace(|a| a / (sum + SOFTMAX_EPS));
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn flatten_spatial(map: ArrayView3<f32>) -> Result<Array2<f32>> {
    let (channels, height, width) = map.dim();
    Array2::from_shape_vec((channels, height * width), map.iter().copied().collect())
        .map_err(|e| TrackError::shape("mask features", "channels x locations", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::IdentityProjection;
    use approx::assert_relative_eq;
    use ndarray::{Array3, array};

    fn descriptor() -> MaskDescriptor {
        let config = TrackerConfig {
            hidden_dim: 4,
            ..TrackerConfig::default()
        };
        MaskDescriptor::new(&config)
    }

    fn features() -> Array3<f32> {
        // 2 channels, 2x2 locations
        Array3::from_shape_vec((2, 2, 2), vec![1.0, 0.0, -1.0, 0.5, 0.0, 1.0, 0.5, -1.0]).unwrap()
    }

    #[test]
    fn test_ungated_matches_plain_softmax_readout() {
        let desc = descriptor().with_gating(false);
        let feats = features();
        let keys = desc.prepare_keys(&IdentityProjection, feats.view()).unwrap();
        let queries = array![[1.0, 0.0], [0.0, 1.0]];
        let out = desc
            .describe(&IdentityProjection, &keys, queries.view(), None)
            .unwrap();

        let flat = flatten_spatial(feats.view()).unwrap();
        for (qi, q) in queries.rows().into_iter().enumerate() {
            let logits: Vec<f32> = flat
                .columns()
                .into_iter()
                .map(|f| (2.0 * f.dot(&q) - f.dot(&f)) / 2.0)
                .collect();
            let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
            let total: f32 = exps.iter().sum();
            for c in 0..2 {
                let expected: f32 = flat
                    .row(c)
                    .iter()
                    .zip(&exps)
                    .map(|(v, e)| v * e / total)
                    .sum();
                assert_relative_eq!(out[[qi, c]], expected, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_gating_restricts_readout_to_mask() {
        let desc = descriptor();
        let feats = features();
        let keys = desc.prepare_keys(&IdentityProjection, feats.view()).unwrap();
        let queries = array![[1.0, 0.0]];
        // only location (1, 1) is foreground
        let mut masks = Array3::from_elem((1, 2, 2), -10.0);
        masks[[0, 1, 1]] = 10.0;
        let out = desc
            .describe(&IdentityProjection, &keys, queries.view(), Some(masks.view()))
            .unwrap();
        assert_relative_eq!(out[[0, 0]], 0.5, epsilon = 1e-5);
        assert_relative_eq!(out[[0, 1]], -1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_empty_mask_is_finite() {
        let desc = descriptor();
        let feats = features();
        let keys = desc.prepare_keys(&IdentityProjection, feats.view()).unwrap();
        let masks = Array3::from_elem((1, 2, 2), -10.0);
        let out = desc
            .describe(&IdentityProjection, &keys, array![[3.0, -2.0]].view(), Some(masks.view()))
            .unwrap();
        assert!(out.iter().all(|x| x.is_finite()));
        // every location suppressed equally, so the readout is the plain mean
        assert_relative_eq!(out[[0, 0]], 0.125, epsilon = 1e-5);
    }

    #[test]
    fn test_chunk_size_does_not_change_result() {
        let feats = features();
        let queries = Array2::from_shape_fn((7, 2), |(i, j)| (i as f32 - 3.0) * 0.3 + j as f32);
        let masks = Array3::from_shape_fn((7, 2, 2), |(i, h, w)| (i + h + w) as f32 - 2.5);

        let small = descriptor().with_chunk_size(2);
        let large = descriptor().with_chunk_size(50);
        let keys = small.prepare_keys(&IdentityProjection, feats.view()).unwrap();
        let a = small
            .describe(&IdentityProjection, &keys, queries.view(), Some(masks.view()))
            .unwrap();
        let b = large
            .describe(&IdentityProjection, &keys, queries.view(), Some(masks.view()))
            .unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_softmax_shift_invariant_and_stable() {
        let mut a = array![[1e5, -1e5], [-1e5, 1e5], [0.0, 0.0]];
        let mut b = a.mapv(|x| x + 123.0);
        softmax_over_locations(&mut a);
        softmax_over_locations(&mut b);
        assert!(a.iter().all(|x| x.is_finite()));
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-6);
        }
        assert_relative_eq!(a[[0, 0]], 1.0, epsilon = 1e-6);
        assert_relative_eq!(a[[1, 1]], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_empty_query_set() {
        let desc = descriptor();
        let feats = features();
        let keys = desc.prepare_keys(&IdentityProjection, feats.view()).unwrap();
        let queries = Array2::<f32>::zeros((0, 2));
        let masks = Array3::<f32>::zeros((0, 2, 2));
        let out = desc
            .describe(&IdentityProjection, &keys, queries.view(), Some(masks.view()))
            .unwrap();
        assert_eq!(out.dim(), (0, 2));
    }

    #[test]
    fn test_rejects_mismatched_masks() {
        let desc = descriptor();
        let feats = features();
        let keys = desc.prepare_keys(&IdentityProjection, feats.view()).unwrap();
        let masks = Array3::<f32>::zeros((2, 2, 2));
        let err = desc
            .describe(&IdentityProjection, &keys, array![[1.0, 0.0]].view(), Some(masks.view()))
            .unwrap_err();
        assert!(matches!(err, TrackError::ShapeMismatch { .. }));
    }
}
