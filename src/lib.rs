//! Track-query memory and association for online video instance
//! segmentation.
//!
//! [`QueryTracker`] runs one frame at a time against a caller-owned
//! [`TrackSession`]. The learned stages around it are supplied through the
//! traits in [`integration`].

pub mod error;
pub mod integration;
pub mod tracker;

pub use error::{Result, TrackError};
pub use tracker::{
    FrameInput, FrameOutput, FrameSupervision, IdentityId, IdentityReport, IdentityStatus,
    QueryTracker, TrackSession, TrackerConfig, TrainingGate,
};
