//! Builder for creating FrameInput objects from upstream detector outputs.

use ndarray::{Array2, Array3};

use crate::error::{Result, TrackError};
use crate::tracker::{FrameInput, TrackerConfig};

/// Builder for creating `FrameInput` objects.
#[derive(Debug, Clone, Default)]
pub struct FrameInputBuilder {
    embeds: Option<Array2<f32>>,
    valid: Option<Vec<bool>>,
    pred_masks: Option<Array3<f32>>,
    mask_features: Option<Array3<f32>>,
}

impl FrameInputBuilder {
    /// Create a new frame input builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the detection embeddings (detections x hidden).
    pub fn embeds(mut self, embeds: Array2<f32>) -> Self {
        self.embeds = Some(embeds);
        self
    }

    /// Set the per-detection validity flags. Every detection is valid when unset.
    pub fn valid(mut self, valid: Vec<bool>) -> Self {
        self.valid = Some(valid);
        self
    }

    /// Mark detections valid when their score exceeds `threshold`.
    pub fn valid_from_scores(mut self, scores: &[f32], threshold: f32) -> Self {
        self.valid = Some(scores.iter().map(|&s| s > threshold).collect());
        self
    }

    /// Set the detection mask logits (detections x height x width).
    pub fn pred_masks(mut self, pred_masks: Array3<f32>) -> Self {
        self.pred_masks = Some(pred_masks);
        self
    }

    /// Set the mask-feature map (channels x height x width).
    pub fn mask_features(mut self, mask_features: Array3<f32>) -> Self {
        self.mask_features = Some(mask_features);
        self
    }

    /// Build the final `FrameInput`, checked against `config`.
    pub fn build(self, config: &TrackerConfig) -> Result<FrameInput> {
        let embeds = self.embeds.ok_or_else(|| missing("embeds"))?;
        let mask_features = self.mask_features.ok_or_else(|| missing("mask_features"))?;
        let (_, h, w) = mask_features.dim();
        let n = embeds.nrows();

        let frame = FrameInput {
            valid: self.valid.unwrap_or_else(|| vec![true; n]),
            pred_masks: self.pred_masks.unwrap_or_else(|| Array3::zeros((n, h, w))),
            embeds,
            mask_features,
        };
        frame.validate(config)?;
        Ok(frame)
    }
}

fn missing(field: &'static str) -> TrackError {
    TrackError::shape(field, "a value", "nothing")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TrackerConfig {
        TrackerConfig {
            hidden_dim: 4,
            mask_dim: 2,
            num_new_ins: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_frame_input_builder() {
        let frame = FrameInputBuilder::new()
            .embeds(Array2::zeros((3, 4)))
            .valid_from_scores(&[0.9, 0.1, 0.6], 0.5)
            .mask_features(Array3::zeros((2, 8, 8)))
            .build(&config())
            .unwrap();

        assert_eq!(frame.valid, vec![true, false, true]);
        assert_eq!(frame.pred_masks.dim(), (3, 8, 8));
        assert_eq!(frame.num_valid(), 2);
    }

    #[test]
    fn test_builder_defaults_to_all_valid() {
        let frame = FrameInputBuilder::new()
            .embeds(Array2::zeros((2, 4)))
            .mask_features(Array3::zeros((2, 4, 4)))
            .build(&config())
            .unwrap();
        assert_eq!(frame.valid, vec![true, true]);
    }

    #[test]
    fn test_builder_rejects_wrong_widths() {
        let missing = FrameInputBuilder::new()
            .embeds(Array2::zeros((2, 4)))
            .build(&config());
        assert!(missing.is_err());

        let narrow = FrameInputBuilder::new()
            .embeds(Array2::zeros((2, 3)))
            .mask_features(Array3::zeros((2, 4, 4)))
            .build(&config());
        assert!(matches!(narrow, Err(TrackError::ShapeMismatch { .. })));

        let flags = FrameInputBuilder::new()
            .embeds(Array2::zeros((2, 4)))
            .valid(vec![true])
            .mask_features(Array3::zeros((2, 4, 4)))
            .build(&config());
        assert!(flags.is_err());
    }
}
