//! Registry of every identity of one video sequence.

use std::collections::HashMap;

use ndarray::ArrayView1;
use tracing::debug;

use crate::error::{Result, TrackError};
use crate::tracker::config::TrackerConfig;
use crate::tracker::identity::{IdentityId, IdentityRecord, SlotOutput};
use crate::tracker::identity_state::IdentityStatus;

/// Owns the identity records of a sequence. Records stay in creation order,
/// including dead ones, so reports can be produced after they die.
#[derive(Debug, Clone)]
pub struct IdentityHub {
    records: Vec<IdentityRecord>,
    index: HashMap<IdentityId, usize>,
    next_id: u64,
    capacity: usize,
    kick_out: u32,
}

impl IdentityHub {
    pub fn new(capacity: usize, kick_out: u32) -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
            next_id: 0,
            capacity,
            kick_out,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.cache_capacity, config.kick_out_frame_num)
    }

    /// Mint a fresh identity. Ids come from a counter that `clear` does not
    /// rewind, so no id is ever handed out twice by one hub.
    pub fn create(&mut self, start_frame: u32, matched_target: Option<i64>) -> IdentityId {
        self.next_id += 1;
        let id = IdentityId(self.next_id);
        self.index.insert(id, self.records.len());
        self.records.push(IdentityRecord::new(
            id,
            start_frame,
            self.capacity,
            matched_target,
        ));
        debug!(identity = %id, start_frame, ?matched_target, "identity created");
        id
    }

    pub fn get(&self, id: IdentityId) -> Result<&IdentityRecord> {
        self.index
            .get(&id)
            .map(|&i| &self.records[i])
            .ok_or(TrackError::IdentityNotFound(id))
    }

    fn get_live_mut(&mut self, id: IdentityId) -> Result<&mut IdentityRecord> {
        let i = *self.index.get(&id).ok_or(TrackError::IdentityNotFound(id))?;
        let record = &mut self.records[i];
        if !record.is_live() {
            return Err(TrackError::IdentityDead(id));
        }
        Ok(record)
    }

    pub fn mark_seen(
        &mut self,
        id: IdentityId,
        slot: SlotOutput,
        descriptor: ArrayView1<f32>,
        reid: Option<ArrayView1<f32>>,
    ) -> Result<()> {
        self.get_live_mut(id)?.mark_seen(slot, descriptor, reid);
        Ok(())
    }

    pub fn mark_missed(
        &mut self,
        id: IdentityId,
        frame_id: u32,
        slot: SlotOutput,
    ) -> Result<IdentityStatus> {
        let kick_out = self.kick_out;
        let record = self.get_live_mut(id)?;
        let status = record.mark_missed(slot, frame_id, kick_out);
        if status == IdentityStatus::Dead {
            debug!(identity = %id, frame_id, "identity kicked out");
        }
        Ok(status)
    }

    /// Live identities in creation order.
    pub fn active_ids(&self) -> Vec<IdentityId> {
        self.live_records().map(|r| r.identity_id).collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &IdentityRecord> {
        self.records.iter()
    }

    pub fn live_records(&self) -> impl Iterator<Item = &IdentityRecord> {
        self.records.iter().filter(|r| r.is_live())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }
}
