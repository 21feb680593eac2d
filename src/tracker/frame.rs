//! Per-frame inputs of the engine.

use ndarray::{Array2, Array3};

use crate::error::{Result, TrackError};
use crate::tracker::config::TrackerConfig;
use crate::tracker::matching::{Correspondence, TargetInstance};

/// Candidate detections of one frame.
#[derive(Debug, Clone)]
pub struct FrameInput {
    /// detections x hidden
    pub embeds: Array2<f32>,
    /// Per-detection validity flag from the upstream detector
    pub valid: Vec<bool>,
    /// detections x height x width mask logits
    pub pred_masks: Array3<f32>,
    /// channels x height x width
    pub mask_features: Array3<f32>,
}

impl FrameInput {
    pub fn num_detections(&self) -> usize {
        self.embeds.nrows()
    }

    pub fn num_valid(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    pub fn spatial_dim(&self) -> (usize, usize) {
        let (_, h, w) = self.mask_features.dim();
        (h, w)
    }

    pub fn validate(&self, config: &TrackerConfig) -> Result<()> {
        let n = self.num_detections();
        if self.embeds.ncols() != config.hidden_dim {
            return Err(TrackError::shape(
                "detection embeddings",
                format!("{n}x{}", config.hidden_dim),
                format!("{n}x{}", self.embeds.ncols()),
            ));
        }
        if self.valid.len() != n {
            return Err(TrackError::shape("validity flags", n, self.valid.len()));
        }
        let (channels, h, w) = self.mask_features.dim();
        if channels != config.mask_dim {
            return Err(TrackError::shape("mask feature channels", config.mask_dim, channels));
        }
        if self.pred_masks.dim() != (n, h, w) {
            return Err(TrackError::shape(
                "detection masks",
                format!("{:?}", (n, h, w)),
                format!("{:?}", self.pred_masks.dim()),
            ));
        }
        Ok(())
    }
}

/// Ground truth available to a training frame.
#[derive(Debug, Clone, Default)]
pub struct FrameSupervision {
    pub targets: Vec<TargetInstance>,
    /// Assignment of detections to targets, used directly on the first frame
    pub detection_targets: Correspondence,
    /// Looser per-detection target assignment used to hide a target's
    /// detections; falls back to `detection_targets` when empty
    pub aux_detection_targets: Vec<Option<i64>>,
}

impl FrameSupervision {
    pub fn aux_targets(&self, num_detections: usize) -> Vec<Option<i64>> {
        if self.aux_detection_targets.is_empty() {
            self.detection_targets.targets_per_query(num_detections)
        } else {
            let mut aux = self.aux_detection_targets.clone();
            aux.resize(num_detections, None);
            aux
        }
    }
}
