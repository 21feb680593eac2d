use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};

/// Configuration for the track-query engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Width of refined query features
    pub hidden_dim: usize,
    /// Channel count of the mask-feature map, and so of positional descriptors
    pub mask_dim: usize,
    /// New-instance slots per frame; equals the detection count per frame
    pub num_new_ins: usize,
    /// Foreground probability a query must exceed to count as detected
    pub inference_select_thr: f32,
    /// Consecutive misses after which an identity dies
    pub kick_out_frame_num: u32,
    /// Bounded history length per identity
    pub cache_capacity: usize,
    /// Chance that a matched query is dropped on the first training frame
    pub kick_out_probability: f32,
    /// Tracked identities required before a disappearance may be injected
    pub min_tracks_for_disappearance: usize,
    pub descriptor_chunk_size: usize,
    /// Mask probability above which a location is foreground
    pub mask_threshold: f32,
    /// Restrict descriptor readout to each query's predicted mask
    pub mask_out_background: bool,
    /// Reported disappearance target when none was injected
    pub disappear_sentinel: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 256,
            mask_dim: 256,
            num_new_ins: 100,
            inference_select_thr: 0.1,
            kick_out_frame_num: 8,
            cache_capacity: 10,
            kick_out_probability: 0.5,
            min_tracks_for_disappearance: 3,
            descriptor_chunk_size: 50,
            mask_threshold: 0.5,
            mask_out_background: true,
            disappear_sentinel: -10000,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hidden_dim == 0 || self.mask_dim == 0 {
            return Err(TrackError::InvalidConfig(
                "hidden_dim and mask_dim must be positive".into(),
            ));
        }
        if self.kick_out_frame_num == 0 {
            return Err(TrackError::InvalidConfig(
                "kick_out_frame_num must be at least 1".into(),
            ));
        }
        if self.descriptor_chunk_size == 0 {
            return Err(TrackError::InvalidConfig(
                "descriptor_chunk_size must be positive".into(),
            ));
        }
        for (name, p) in [
            ("inference_select_thr", self.inference_select_thr),
            ("kick_out_probability", self.kick_out_probability),
            ("mask_threshold", self.mask_threshold),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(TrackError::InvalidConfig(format!(
                    "{name} must lie in [0, 1], got {p}"
                )));
            }
        }
        Ok(())
    }
}
