//! Training-time disappearance injection.

use rand::Rng;
use tracing::debug;

use crate::tracker::frame::FrameSupervision;

/// A target hidden from the current frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disappearance {
    pub target_id: i64,
    /// Track slot whose target was hidden
    pub slot: usize,
    /// Per-detection flag, `true` for hidden detections
    pub hidden: Vec<bool>,
}

#[derive(Debug, Clone)]
pub struct DisappearanceCurriculum {
    min_tracks: usize,
}

impl DisappearanceCurriculum {
    pub fn new(min_tracks: usize) -> Self {
        Self { min_tracks }
    }

    /// Pick at most one tracked target to hide from this frame's detections.
    ///
    /// `slot_targets` are the targets of the track slots carried into the
    /// frame, `already_hidden` the targets hidden earlier in the sample.
    pub fn select<R: Rng>(
        &self,
        rng: &mut R,
        slot_targets: &[Option<i64>],
        already_hidden: &[i64],
        confidence_gate: bool,
        supervision: &FrameSupervision,
        num_detections: usize,
    ) -> Option<Disappearance> {
        if slot_targets.is_empty() || slot_targets.len() < self.min_tracks {
            return None;
        }
        let slot = rng.random_range(0..slot_targets.len());
        if confidence_gate || !already_hidden.is_empty() {
            return None;
        }

        let target_id = slot_targets[slot]?;
        if !supervision.detection_targets.contains_target(target_id) {
            return None;
        }

        let hidden: Vec<bool> = supervision
            .aux_targets(num_detections)
            .into_iter()
            .map(|t| t == Some(target_id))
            .collect();
        debug!(target_id, slot, "hiding target from frame");
        Some(Disappearance {
            target_id,
            slot,
            hidden,
        })
    }
}
