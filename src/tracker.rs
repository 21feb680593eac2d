mod association;
mod config;
mod curriculum;
mod descriptor;
mod frame;
mod fusion;
mod hub;
mod identity;
mod identity_state;
mod matching;
mod output;
mod query_set;
mod session;

pub use association::{QueryTracker, TrainingGate};
pub use config::TrackerConfig;
pub use curriculum::{Disappearance, DisappearanceCurriculum};
pub use descriptor::{MASKED_AFFINITY, MaskDescriptor, MaskKeys, softmax_over_locations};
pub use frame::{FrameInput, FrameSupervision};
pub use fusion::{FusedFeature, mean_cosine_similarity};
pub use hub::IdentityHub;
pub use identity::{IdentityId, IdentityRecord, SlotOutput};
pub use identity_state::IdentityStatus;
pub use matching::{
    AssignmentResult, ClassCostMatcher, Correspondence, FramePrediction, Matcher, TargetInstance,
    class_probabilities, foreground_scores, linear_assignment,
};
pub use output::{ContrastiveTuple, FrameOutput, IdentityReport, LayerPrediction};
pub use query_set::{FrameQuerySet, attention_mask};
pub use session::{TrackSession, TrackSlots};
