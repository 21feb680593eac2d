//! Identity record: one tracked object over its lifetime.

use std::collections::VecDeque;
use std::fmt;

use ndarray::{Array1, Array2, ArrayView1};
use serde::Serialize;

use crate::tracker::fusion::FusedFeature;
use crate::tracker::identity_state::IdentityStatus;

/// Session-unique identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct IdentityId(pub u64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What one query slot produced on one frame.
#[derive(Debug, Clone)]
pub struct SlotOutput {
    /// Refined query feature, fed back as the next frame's track slot
    pub feature: Array1<f32>,
    /// Class logits, background last
    pub logits: Array1<f32>,
    /// Mask logits, height x width
    pub mask: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct IdentityRecord {
    pub identity_id: IdentityId,
    pub start_frame: u32,
    /// Set when the identity dies
    pub end_frame: Option<u32>,
    pub status: IdentityStatus,
    pub consecutive_invalid_count: u32,
    /// Ground-truth target this identity was created for (training only)
    pub matched_target: Option<i64>,
    queries: VecDeque<Array1<f32>>,
    reid: Option<FusedFeature>,
    positions: FusedFeature,
    pred_logits: Vec<Array1<f32>>,
    pred_masks: Vec<Array2<f32>>,
    appearance: Vec<bool>,
    capacity: usize,
}

impl IdentityRecord {
    pub fn new(
        identity_id: IdentityId,
        start_frame: u32,
        capacity: usize,
        matched_target: Option<i64>,
    ) -> Self {
        Self {
            identity_id,
            start_frame,
            end_frame: None,
            status: IdentityStatus::Active,
            consecutive_invalid_count: 0,
            matched_target,
            queries: VecDeque::with_capacity(capacity + 1),
            reid: None,
            positions: FusedFeature::new(capacity),
            pred_logits: Vec::new(),
            pred_masks: Vec::new(),
            appearance: Vec::new(),
            capacity,
        }
    }

    /// Register a confirmed detection.
    ///
    /// With a re-id embedding the fusion weight comes from the re-id history and
    /// is applied to the positional descriptor as well; otherwise the
    /// descriptor history drives its own fusion.
    pub fn mark_seen(
        &mut self,
        slot: SlotOutput,
        descriptor: ArrayView1<f32>,
        reid: Option<ArrayView1<f32>>,
    ) {
        match reid {
            Some(embedding) => {
                let capacity = self.capacity;
                let beta = self
                    .reid
                    .get_or_insert_with(|| FusedFeature::new(capacity))
                    .update(embedding);
                self.positions.blend(descriptor, beta);
                self.positions.record(descriptor);
            }
            None => {
                self.positions.update(descriptor);
            }
        }

        self.consecutive_invalid_count = 0;
        self.status = IdentityStatus::Active;
        self.push_output(slot, true);
    }

    /// Register a frame without a confirmed detection and return the new status.
    pub fn mark_missed(
        &mut self,
        slot: SlotOutput,
        frame_id: u32,
        kick_out: u32,
    ) -> IdentityStatus {
        self.consecutive_invalid_count += 1;
        if self.consecutive_invalid_count >= kick_out {
            self.status = IdentityStatus::Dead;
            self.end_frame = Some(frame_id);
            return self.status;
        }

        self.status = IdentityStatus::Inactive;
        self.push_output(slot, false);
        self.status
    }

    fn push_output(&mut self, slot: SlotOutput, appeared: bool) {
        self.queries.push_back(slot.feature);
        while self.queries.len() > self.capacity.max(1) {
            self.queries.pop_front();
        }
        self.pred_logits.push(slot.logits);
        self.pred_masks.push(slot.mask);
        self.appearance.push(appeared);
    }

    /// Most recent refined feature, the seed of this identity's track slot.
    pub fn track_query(&self) -> Option<&Array1<f32>> {
        self.queries.back()
    }

    /// Fused positional descriptor.
    pub fn position_embedding(&self) -> Option<&Array1<f32>> {
        self.positions.fused()
    }

    /// Fused re-id embedding, present once a re-id head has fed this identity.
    pub fn reid_embedding(&self) -> Option<&Array1<f32>> {
        self.reid.as_ref().and_then(|r| r.fused())
    }

    pub fn embedding_history(&self) -> impl Iterator<Item = &Array1<f32>> {
        self.queries.iter()
    }

    pub fn position_history(&self) -> &FusedFeature {
        &self.positions
    }

    pub fn pred_logits(&self) -> &[Array1<f32>] {
        &self.pred_logits
    }

    pub fn pred_masks(&self) -> &[Array2<f32>] {
        &self.pred_masks
    }

    pub fn appearance(&self) -> &[bool] {
        &self.appearance
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }
}
