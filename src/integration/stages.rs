//! Traits for the learned stages that surround the tracker.
//!
//! The tracker never looks inside these; it only relies on their shapes.

use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3};

/// Inputs of one refinement pass.
#[derive(Debug, Clone, Copy)]
pub struct RefineRequest<'a> {
    /// queries x hidden
    pub queries: ArrayView2<'a, f32>,
    /// keys x hidden
    pub keys: ArrayView2<'a, f32>,
    pub query_pos: Option<ArrayView2<'a, f32>>,
    pub key_pos: Option<ArrayView2<'a, f32>>,
    /// queries x keys, `true` blocks attention
    pub attn_mask: Option<ArrayView2<'a, bool>>,
}

/// Cross-attention, self-attention and feed-forward layers.
///
/// # Example
///
/// ```
/// use ndarray::Array2;
/// use query_tracker_rs::integration::{RefineRequest, RefinementStack};
///
/// struct Passthrough;
///
/// impl RefinementStack for Passthrough {
///     fn num_layers(&self) -> usize {
///         1
///     }
///
///     fn refine(&self, request: RefineRequest<'_>) -> Vec<Array2<f32>> {
///         vec![request.queries.to_owned()]
///     }
/// }
/// ```
pub trait RefinementStack {
    fn num_layers(&self) -> usize;

    /// Return the output of every layer, first layer first. Each output keeps
    /// the shape of `request.queries`.
    fn refine(&self, request: RefineRequest<'_>) -> Vec<Array2<f32>>;
}

/// Class, mask and position heads applied to refined queries.
pub trait PredictionHeads {
    /// queries x (classes + 1), background last
    fn classify(&self, refined: ArrayView2<f32>) -> Array2<f32>;

    /// queries x height x width mask logits
    fn embed_mask(&self, refined: ArrayView2<f32>, mask_features: ArrayView3<f32>) -> Array3<f32>;

    /// Map mask-guided descriptors (rows x mask_dim) to query position
    /// embeddings (rows x hidden).
    fn encode_position(&self, descriptors: ArrayView2<f32>) -> Array2<f32> {
        descriptors.to_owned()
    }
}

/// Projections into the shared key space of the descriptor affinity.
pub trait KeyProjection {
    /// queries x hidden -> queries x key_dim
    fn project_queries(&self, queries: ArrayView2<f32>) -> Array2<f32>;

    /// channels x height x width -> key_dim x height x width
    fn project_mask_features(&self, mask_features: ArrayView3<f32>) -> Array3<f32>;
}

/// Leaves both inputs unchanged; needs hidden == mask channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityProjection;

impl KeyProjection for IdentityProjection {
    fn project_queries(&self, queries: ArrayView2<f32>) -> Array2<f32> {
        queries.to_owned()
    }

    fn project_mask_features(&self, mask_features: ArrayView3<f32>) -> Array3<f32> {
        mask_features.to_owned()
    }
}

/// Re-identification head over positional descriptors.
pub trait ReidHead {
    fn embed(&self, descriptors: ArrayView2<f32>) -> Array2<f32>;
}

/// Learned seed embeddings shared by all slots of a kind.
#[derive(Debug, Clone)]
pub struct QuerySeeds {
    /// Seed of every new-instance slot
    pub new_instance: Array1<f32>,
    /// Placeholder key standing in for a missing detection
    pub disappear: Array1<f32>,
}

impl QuerySeeds {
    pub fn zeros(hidden_dim: usize) -> Self {
        Self {
            new_instance: Array1::zeros(hidden_dim),
            disappear: Array1::zeros(hidden_dim),
        }
    }
}
