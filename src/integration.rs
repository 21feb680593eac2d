//! Integration module connecting the tracker with the learned stages around it.
//!
//! This module provides the traits the per-frame engine calls into
//! (refinement stack, prediction heads, key projections, re-id head), a
//! builder for frame inputs and a sequence-level pipeline.

mod builder;
mod pipeline;
mod stages;

pub use builder::FrameInputBuilder;
pub use pipeline::{SequencePipeline, TrainingFrame};
pub use stages::{
    IdentityProjection, KeyProjection, PredictionHeads, QuerySeeds, RefineRequest,
    RefinementStack, ReidHead,
};
