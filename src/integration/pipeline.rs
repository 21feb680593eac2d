//! SequencePipeline for running the engine over whole clips.

use crate::error::Result;
use crate::tracker::{
    FrameInput, FrameOutput, FrameSupervision, IdentityReport, Matcher, QueryTracker,
    TrackSession, TrainingGate,
};

use super::{IdentityProjection, KeyProjection, PredictionHeads, RefinementStack};

/// One training frame with its ground truth.
#[derive(Debug, Clone)]
pub struct TrainingFrame {
    pub input: FrameInput,
    pub supervision: FrameSupervision,
}

/// A tracking engine bundled with the session it drives.
///
/// Each `run_*` call treats its frames as one sequence and starts from a
/// fresh session; `process_frame` continues the current one.
pub struct SequencePipeline<S, H, P = IdentityProjection> {
    tracker: QueryTracker<S, H, P>,
    session: TrackSession,
}

impl<S, H, P> SequencePipeline<S, H, P>
where
    S: RefinementStack,
    H: PredictionHeads,
    P: KeyProjection,
{
    /// Create a new pipeline; `seed` drives the training-time randomness.
    pub fn new(tracker: QueryTracker<S, H, P>, seed: u64) -> Self {
        let session = tracker.new_session(seed);
        Self { tracker, session }
    }

    /// Process a single inference frame of the current sequence.
    pub fn process_frame(&mut self, frame: &FrameInput) -> Result<FrameOutput> {
        self.tracker.infer_step(&mut self.session, frame)
    }

    /// Track a whole clip and return one report per identity, dead ones
    /// included, in creation order.
    pub fn run_inference<'a, I>(&mut self, frames: I) -> Result<Vec<IdentityReport>>
    where
        I: IntoIterator<Item = &'a FrameInput>,
    {
        self.session.reset();
        for frame in frames {
            self.tracker.infer_step(&mut self.session, frame)?;
        }
        Ok(self.session.reports())
    }

    /// Run one training sample and return the per-frame outputs for the loss.
    pub fn run_training(
        &mut self,
        frames: &[TrainingFrame],
        matcher: &mut dyn Matcher,
        gate: TrainingGate,
    ) -> Result<Vec<FrameOutput>> {
        self.session.reset();
        let mut outputs = Vec::with_capacity(frames.len());
        for frame in frames {
            outputs.push(self.tracker.train_step(
                &mut self.session,
                &frame.input,
                &frame.supervision,
                &mut *matcher,
                gate,
            )?);
        }
        Ok(outputs)
    }

    /// Start a new sequence at frame 0.
    pub fn reset(&mut self) {
        self.session.reset();
    }

    /// Get a reference to the underlying engine.
    pub fn tracker(&self) -> &QueryTracker<S, H, P> {
        &self.tracker
    }

    /// Get a reference to the current session.
    pub fn session(&self) -> &TrackSession {
        &self.session
    }

    /// Get a mutable reference to the current session.
    pub fn session_mut(&mut self) -> &mut TrackSession {
        &mut self.session
    }
}
