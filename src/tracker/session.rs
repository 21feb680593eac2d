//! Per-sequence tracking state, owned by the caller and passed into every
//! frame step.

use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::tracker::config::TrackerConfig;
use crate::tracker::hub::IdentityHub;
use crate::tracker::identity::IdentityId;
use crate::tracker::matching::Correspondence;
use crate::tracker::output::IdentityReport;

/// Track slots carried from one frame into the next.
///
/// Row `k` of every matrix belongs to `ids[k]`.
#[derive(Debug, Clone)]
pub struct TrackSlots {
    pub ids: Vec<IdentityId>,
    /// slots x hidden
    pub queries: Array2<f32>,
    /// Fused positional descriptors, slots x mask_dim
    pub embeds: Array2<f32>,
    /// Target each slot was matched to on its last frame (training only)
    pub targets: Vec<Option<i64>>,
    /// Re-id embedding of each slot on its last frame
    pub reid: Option<Array2<f32>>,
}

impl TrackSlots {
    pub fn empty(hidden_dim: usize, mask_dim: usize) -> Self {
        Self {
            ids: Vec::new(),
            queries: Array2::zeros((0, hidden_dim)),
            embeds: Array2::zeros((0, mask_dim)),
            targets: Vec::new(),
            reid: None,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TrackSession {
    pub(crate) hub: IdentityHub,
    pub(crate) slots: TrackSlots,
    /// Correspondence of the carried slots, indexed by slot position
    pub(crate) previous: Correspondence,
    /// Targets hidden so far in this sample
    pub(crate) disappeared: Vec<i64>,
    pub(crate) rng: ChaCha8Rng,
    frame_id: u32,
    frames_seen: usize,
    hidden_dim: usize,
    mask_dim: usize,
}

impl TrackSession {
    pub fn new(config: &TrackerConfig, seed: u64) -> Self {
        Self {
            hub: IdentityHub::from_config(config),
            slots: TrackSlots::empty(config.hidden_dim, config.mask_dim),
            previous: Correspondence::default(),
            disappeared: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            frame_id: 0,
            frames_seen: 0,
            hidden_dim: config.hidden_dim,
            mask_dim: config.mask_dim,
        }
    }

    /// Start a new sequence at frame 0.
    pub fn reset(&mut self) {
        self.new_sequence(0);
    }

    /// Drop all state; the next frame takes the first-frame path and is
    /// numbered `start_frame`.
    pub fn new_sequence(&mut self, start_frame: u32) {
        debug!(start_frame, identities = self.hub.len(), "starting new sequence");
        self.hub.clear();
        self.slots = TrackSlots::empty(self.hidden_dim, self.mask_dim);
        self.previous = Correspondence::default();
        self.disappeared.clear();
        self.frame_id = start_frame;
        self.frames_seen = 0;
    }

    /// No frame processed since the last reset.
    pub fn is_fresh(&self) -> bool {
        self.frames_seen == 0
    }

    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    pub(crate) fn advance(&mut self) {
        self.frame_id += 1;
        self.frames_seen += 1;
    }

    pub fn hub(&self) -> &IdentityHub {
        &self.hub
    }

    pub fn slots(&self) -> &TrackSlots {
        &self.slots
    }

    pub fn track_ids(&self) -> &[IdentityId] {
        &self.slots.ids
    }

    pub fn previous_correspondence(&self) -> &Correspondence {
        &self.previous
    }

    /// Reports for every identity of the sequence, dead ones included.
    pub fn reports(&self) -> Vec<IdentityReport> {
        self.hub.records().map(IdentityReport::from).collect()
    }

    pub fn live_reports(&self) -> Vec<IdentityReport> {
        self.hub.live_records().map(IdentityReport::from).collect()
    }
}
