//! Records emitted by the engine.

use ndarray::{Array1, Array2, Array3};
use serde::Serialize;

use crate::tracker::identity::{IdentityId, IdentityRecord};
use crate::tracker::identity_state::IdentityStatus;
use crate::tracker::matching::Correspondence;

/// Class and mask logits of one refinement layer.
#[derive(Debug, Clone)]
pub struct LayerPrediction {
    pub logits: Array2<f32>,
    pub masks: Array3<f32>,
}

/// Anchor/positive/negatives triple for the re-id contrastive loss.
#[derive(Debug, Clone)]
pub struct ContrastiveTuple {
    pub anchor: Array1<f32>,
    pub positive: Array1<f32>,
    /// Every other query of the current frame
    pub negatives: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub frame_id: u32,
    /// Final layer, queries x (classes + 1)
    pub pred_logits: Array2<f32>,
    /// Final layer, queries x height x width
    pub pred_masks: Array3<f32>,
    /// Every earlier layer, input layer first
    pub aux_outputs: Vec<LayerPrediction>,
    pub num_valid_detections: usize,
    /// Empty at inference
    pub correspondence: Correspondence,
    /// Hidden target, or the configured sentinel
    pub disappear_tgt_id: i64,
    pub contrastive: Vec<ContrastiveTuple>,
    /// Identities of the next frame's track slots, in slot order
    pub track_ids: Vec<IdentityId>,
}

impl FrameOutput {
    pub fn num_queries(&self) -> usize {
        self.pred_logits.nrows()
    }
}

/// Everything downstream consumers need about one identity.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityReport {
    pub identity_id: IdentityId,
    pub start_frame: u32,
    pub end_frame: Option<u32>,
    pub status: IdentityStatus,
    pub matched_target: Option<i64>,
    pub pred_logits: Vec<Array1<f32>>,
    pub pred_masks: Vec<Array2<f32>>,
    /// `true` for a real detection, `false` for a carried-over frame
    pub appearance: Vec<bool>,
}

impl From<&IdentityRecord> for IdentityReport {
    fn from(record: &IdentityRecord) -> Self {
        Self {
            identity_id: record.identity_id,
            start_frame: record.start_frame,
            end_frame: record.end_frame,
            status: record.status,
            matched_target: record.matched_target,
            pred_logits: record.pred_logits().to_vec(),
            pred_masks: record.pred_masks().to_vec(),
            appearance: record.appearance().to_vec(),
        }
    }
}
