//! Per-frame association engine.
//!
//! One call processes one frame: build the query set from the carried track
//! slots, refine it, predict, decide which queries are valid, update the
//! identity hub and prepare the next frame's track slots.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use tracing::trace;

use crate::error::{Result, TrackError};
use crate::integration::{
    IdentityProjection, KeyProjection, PredictionHeads, QuerySeeds, RefinementStack, ReidHead,
};
use crate::tracker::config::TrackerConfig;
use crate::tracker::curriculum::DisappearanceCurriculum;
use crate::tracker::descriptor::{MaskDescriptor, MaskKeys};
use crate::tracker::frame::{FrameInput, FrameSupervision};
use crate::tracker::identity::{IdentityId, SlotOutput};
use crate::tracker::matching::{Correspondence, FramePrediction, Matcher, foreground_scores};
use crate::tracker::output::{ContrastiveTuple, FrameOutput, LayerPrediction};
use crate::tracker::query_set::{
    FrameQuerySet, attention_mask, concat_rows, repeat_rows, stack_rows,
};
use crate::tracker::session::{TrackSession, TrackSlots};

/// How training decides which queries continue as tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingGate {
    /// Foreground probability above `inference_select_thr`
    Confidence,
    /// Queries matched to a target; on the first frame a random share of
    /// them is dropped
    Matched,
}

enum Mode<'a> {
    Inference,
    Training {
        supervision: &'a FrameSupervision,
        matcher: &'a mut dyn Matcher,
        gate: TrainingGate,
    },
}

pub struct QueryTracker<S, H, P = IdentityProjection> {
    config: TrackerConfig,
    stack: S,
    heads: H,
    projection: P,
    seeds: QuerySeeds,
    reid: Option<Box<dyn ReidHead>>,
    descriptor: MaskDescriptor,
    curriculum: DisappearanceCurriculum,
}

impl<S, H, P> QueryTracker<S, H, P>
where
    S: RefinementStack,
    H: PredictionHeads,
    P: KeyProjection,
{
    pub fn new(
        config: TrackerConfig,
        stack: S,
        heads: H,
        projection: P,
        seeds: QuerySeeds,
    ) -> Result<Self> {
        config.validate()?;
        for (what, seed) in [
            ("new-instance seed", &seeds.new_instance),
            ("disappear seed", &seeds.disappear),
        ] {
            if seed.len() != config.hidden_dim {
                return Err(TrackError::shape(what, config.hidden_dim, seed.len()));
            }
        }
        Ok(Self {
            descriptor: MaskDescriptor::new(&config),
            curriculum: DisappearanceCurriculum::new(config.min_tracks_for_disappearance),
            config,
            stack,
            heads,
            projection,
            seeds,
            reid: None,
        })
    }

    /// Fuse identities on re-id embeddings of their descriptors instead of
    /// the descriptors alone, and emit contrastive tuples in training.
    pub fn with_reid_head(mut self, head: impl ReidHead + 'static) -> Self {
        self.reid = Some(Box::new(head));
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn has_reid_head(&self) -> bool {
        self.reid.is_some()
    }

    pub fn new_session(&self, seed: u64) -> TrackSession {
        TrackSession::new(&self.config, seed)
    }

    /// Process one frame without ground truth.
    pub fn infer_step(
        &self,
        session: &mut TrackSession,
        frame: &FrameInput,
    ) -> Result<FrameOutput> {
        self.step(session, frame, Mode::Inference)
    }

    /// Process one training frame.
    pub fn train_step(
        &self,
        session: &mut TrackSession,
        frame: &FrameInput,
        supervision: &FrameSupervision,
        matcher: &mut dyn Matcher,
        gate: TrainingGate,
    ) -> Result<FrameOutput> {
        self.step(
            session,
            frame,
            Mode::Training {
                supervision,
                matcher,
                gate,
            },
        )
    }

    fn step(
        &self,
        session: &mut TrackSession,
        frame: &FrameInput,
        mode: Mode<'_>,
    ) -> Result<FrameOutput> {
        frame.validate(&self.config)?;
        let first = session.is_fresh();
        let frame_id = session.frame_id();
        let keys = self
            .descriptor
            .prepare_keys(&self.projection, frame.mask_features.view())?;

        let disappearance = match &mode {
            Mode::Training {
                supervision, gate, ..
            } if !first => self.curriculum.select(
                &mut session.rng,
                &session.slots.targets,
                &session.disappeared,
                *gate == TrainingGate::Confidence,
                supervision,
                frame.num_detections(),
            ),
            _ => None,
        };
        let visible: Vec<bool> = frame
            .valid
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                v && !disappearance
                    .as_ref()
                    .is_some_and(|d| d.hidden.get(i).copied().unwrap_or(false))
            })
            .collect();

        let query_set = if first {
            FrameQuerySet::from_detections(frame.embeds.view())
        } else {
            self.build_query_set(&session.slots, frame, &keys, &visible)?
        };
        trace!(
            frame_id,
            tracks = query_set.num_tracks,
            queries = query_set.len(),
            "query set built"
        );

        let layers = self.refine(&query_set)?;
        let mut aux_outputs = layers
            .iter()
            .map(|layer| self.predict(layer.view(), frame))
            .collect::<Result<Vec<_>>>()?;
        let (Some(final_layer), Some(final_pred)) = (layers.last(), aux_outputs.pop()) else {
            return Err(TrackError::shape("refinement layers", "at least one", 0));
        };
        let num_queries = query_set.len();

        let scores = foreground_scores(final_pred.logits.view());
        let confident: Vec<bool> = scores
            .iter()
            .map(|&s| s > self.config.inference_select_thr)
            .collect();

        let training = matches!(mode, Mode::Training { .. });
        let (correspondence, valid, targets) = match mode {
            Mode::Inference => (Correspondence::default(), confident, vec![None; num_queries]),
            Mode::Training {
                supervision,
                matcher,
                gate,
            } => {
                let correspondence = if first {
                    supervision.detection_targets.clone()
                } else {
                    let prediction = FramePrediction {
                        logits: final_pred.logits.view(),
                        masks: final_pred.masks.view(),
                    };
                    matcher.assign(&prediction, &supervision.targets, &session.previous)?
                };
                if let Some(&(query, _)) =
                    correspondence.pairs().iter().find(|&&(q, _)| q >= num_queries)
                {
                    return Err(TrackError::shape(
                        "correspondence query index",
                        format!("below {num_queries}"),
                        query,
                    ));
                }
                let mut targets = correspondence.targets_per_query(num_queries);
                let valid = match gate {
                    TrainingGate::Confidence => confident,
                    TrainingGate::Matched => {
                        if first {
                            self.kick_out_matched(&mut session.rng, &mut targets);
                        }
                        targets.iter().map(Option::is_some).collect()
                    }
                };
                (correspondence, valid, targets)
            }
        };

        let descriptors = self.descriptor.describe(
            &self.projection,
            &keys,
            final_layer.view(),
            Some(final_pred.masks.view()),
        )?;
        let reid = self.reid_embeddings(descriptors.view())?;

        let hidden_target = disappearance.as_ref().map(|d| d.target_id);
        let contrastive = if training && !first {
            contrastive_tuples(session, reid.as_ref(), hidden_target)
        } else {
            Vec::new()
        };

        let updated = FrameUpdate {
            refined: final_layer,
            prediction: &final_pred,
            descriptors: &descriptors,
            reid: reid.as_ref(),
            valid: &valid,
            targets: &targets,
        };
        self.commit(session, &updated)?;
        if let Some(target_id) = hidden_target {
            session.disappeared.push(target_id);
        }
        session.advance();

        Ok(FrameOutput {
            frame_id,
            pred_logits: final_pred.logits,
            pred_masks: final_pred.masks,
            aux_outputs,
            num_valid_detections: frame.num_valid(),
            correspondence,
            disappear_tgt_id: hidden_target.unwrap_or(self.config.disappear_sentinel),
            contrastive,
            track_ids: session.slots.ids.clone(),
        })
    }

    fn build_query_set(
        &self,
        slots: &TrackSlots,
        frame: &FrameInput,
        keys: &MaskKeys,
        visible: &[bool],
    ) -> Result<FrameQuerySet> {
        let num_new = self.config.num_new_ins;
        if frame.num_detections() != num_new {
            return Err(TrackError::shape(
                "detections per frame (new-instance slots)",
                num_new,
                frame.num_detections(),
            ));
        }

        let det_descriptors = self.descriptor.describe(
            &self.projection,
            keys,
            frame.embeds.view(),
            Some(frame.pred_masks.view()),
        )?;
        let det_pos = self.encode_position(det_descriptors.view())?;
        let track_pos = self.encode_position(slots.embeds.view())?;

        let new_ins = repeat_rows(self.seeds.new_instance.view(), num_new);
        let placeholders = repeat_rows(self.seeds.disappear.view(), slots.len());

        let queries = concat_rows(
            "track and new-instance queries",
            slots.queries.view(),
            new_ins.view(),
        )?;
        let keys = concat_rows(
            "detection and placeholder keys",
            frame.embeds.view(),
            placeholders.view(),
        )?;

        Ok(FrameQuerySet {
            queries,
            keys,
            query_pos: Some(concat_rows("query positions", track_pos.view(), det_pos.view())?),
            key_pos: Some(concat_rows("key positions", det_pos.view(), slots.queries.view())?),
            attn_mask: Some(attention_mask(slots.len(), num_new, visible)),
            num_tracks: slots.len(),
        })
    }

    fn encode_position(&self, descriptors: ArrayView2<f32>) -> Result<Array2<f32>> {
        let pos = self.heads.encode_position(descriptors);
        let expected = (descriptors.nrows(), self.config.hidden_dim);
        if pos.dim() != expected {
            return Err(TrackError::shape(
                "position encoding",
                format!("{expected:?}"),
                format!("{:?}", pos.dim()),
            ));
        }
        Ok(pos)
    }

    /// The input query set followed by every layer's output.
    fn refine(&self, query_set: &FrameQuerySet) -> Result<Vec<Array2<f32>>> {
        let outputs = self.stack.refine(query_set.request());
        if outputs.len() != self.stack.num_layers() {
            return Err(TrackError::shape(
                "refinement layers",
                self.stack.num_layers(),
                outputs.len(),
            ));
        }

        let mut layers = Vec::with_capacity(outputs.len() + 1);
        layers.push(query_set.queries.clone());
        for output in outputs {
            if output.dim() != query_set.queries.dim() {
                return Err(TrackError::shape(
                    "refined queries",
                    format!("{:?}", query_set.queries.dim()),
                    format!("{:?}", output.dim()),
                ));
            }
            layers.push(output);
        }
        Ok(layers)
    }

    fn predict(&self, layer: ArrayView2<f32>, frame: &FrameInput) -> Result<LayerPrediction> {
        let logits = self.heads.classify(layer);
        if logits.nrows() != layer.nrows() || logits.ncols() < 2 {
            return Err(TrackError::shape(
                "class logits",
                format!("{} x (classes + 1)", layer.nrows()),
                format!("{:?}", logits.dim()),
            ));
        }
        let masks = self.heads.embed_mask(layer, frame.mask_features.view());
        let (h, w) = frame.spatial_dim();
        if masks.dim() != (layer.nrows(), h, w) {
            return Err(TrackError::shape(
                "mask logits",
                format!("{:?}", (layer.nrows(), h, w)),
                format!("{:?}", masks.dim()),
            ));
        }
        Ok(LayerPrediction { logits, masks })
    }

    fn reid_embeddings(&self, descriptors: ArrayView2<f32>) -> Result<Option<Array2<f32>>> {
        let Some(head) = &self.reid else {
            return Ok(None);
        };
        let embeddings = head.embed(descriptors);
        if embeddings.nrows() != descriptors.nrows() {
            return Err(TrackError::shape(
                "re-id embeddings",
                descriptors.nrows(),
                embeddings.nrows(),
            ));
        }
        Ok(Some(embeddings))
    }

    /// Drop each matched query with the configured probability.
    fn kick_out_matched<R: Rng>(&self, rng: &mut R, targets: &mut [Option<i64>]) {
        for target in targets.iter_mut().filter(|t| t.is_some()) {
            if rng.random::<f32>() < self.config.kick_out_probability {
                *target = None;
            }
        }
    }

    /// Write this frame's results into the hub and rebuild the track slots.
    fn commit(&self, session: &mut TrackSession, update: &FrameUpdate<'_>) -> Result<()> {
        let frame_id = session.frame_id();
        let carried = std::mem::take(&mut session.slots.ids);
        let carried_targets = std::mem::take(&mut session.slots.targets);
        let mut next: Vec<(usize, IdentityId)> = Vec::new();

        for (k, &is_valid) in update.valid.iter().enumerate() {
            let slot = SlotOutput {
                feature: update.refined.row(k).to_owned(),
                logits: update.prediction.logits.row(k).to_owned(),
                mask: update.prediction.masks.index_axis(Axis(0), k).to_owned(),
            };
            let existing = carried.get(k).copied();

            if is_valid {
                let id = match existing {
                    Some(id) => id,
                    None => session.hub.create(frame_id, update.targets[k]),
                };
                session.hub.mark_seen(
                    id,
                    slot,
                    update.descriptors.row(k),
                    update.reid.map(|r| r.row(k)),
                )?;
                next.push((k, id));
            } else if let Some(id) = existing {
                if session.hub.mark_missed(id, frame_id, slot)?.is_live() {
                    next.push((k, id));
                }
            }
        }

        let (queries, embeds) = {
            let mut query_rows: Vec<&Array1<f32>> = Vec::with_capacity(next.len());
            let mut embed_rows: Vec<&Array1<f32>> = Vec::with_capacity(next.len());
            for &(_, id) in &next {
                let record = session.hub.get(id)?;
                let empty = || TrackError::shape("identity history", "at least one frame", "none");
                query_rows.push(record.track_query().ok_or_else(empty)?);
                embed_rows.push(record.position_embedding().ok_or_else(empty)?);
            }
            (
                stack_rows(query_rows, self.config.hidden_dim)?,
                stack_rows(embed_rows, self.config.mask_dim)?,
            )
        };

        let rows: Vec<usize> = next.iter().map(|&(k, _)| k).collect();
        // a missed slot keeps the target it was last matched to
        let targets: Vec<Option<i64>> = rows
            .iter()
            .map(|&k| update.targets[k].or(carried_targets.get(k).copied().flatten()))
            .collect();
        session.previous = Correspondence::new(
            targets
                .iter()
                .enumerate()
                .filter_map(|(slot, t)| t.map(|t| (slot, t)))
                .collect(),
        );
        session.slots = TrackSlots {
            ids: next.into_iter().map(|(_, id)| id).collect(),
            queries,
            embeds,
            targets,
            reid: update.reid.map(|r| r.select(Axis(0), &rows)),
        };
        Ok(())
    }
}

struct FrameUpdate<'a> {
    refined: &'a Array2<f32>,
    prediction: &'a LayerPrediction,
    descriptors: &'a Array2<f32>,
    reid: Option<&'a Array2<f32>>,
    valid: &'a [bool],
    targets: &'a [Option<i64>],
}

/// Pair every carried, matched slot's previous re-id embedding with its
/// current one; the other current queries are the negatives. Each pair is
/// emitted in both directions.
fn contrastive_tuples(
    session: &TrackSession,
    current: Option<&Array2<f32>>,
    hidden_target: Option<i64>,
) -> Vec<ContrastiveTuple> {
    let (Some(current), Some(previous)) = (current, session.slots.reid.as_ref()) else {
        return Vec::new();
    };
    let num_queries = current.nrows();

    let mut tuples = Vec::new();
    for &(slot, target) in session.previous.pairs() {
        if Some(target) == hidden_target || slot >= previous.nrows() || slot >= num_queries {
            continue;
        }
        let anchor = previous.row(slot).to_owned();
        let positive = current.row(slot).to_owned();
        let others: Vec<usize> = (0..num_queries).filter(|&q| q != slot).collect();
        let negatives = current.select(Axis(0), &others);

        tuples.push(ContrastiveTuple {
            anchor: anchor.clone(),
            positive: positive.clone(),
            negatives: negatives.clone(),
        });
        tuples.push(ContrastiveTuple {
            anchor: positive,
            positive: anchor,
            negatives,
        });
    }
    tuples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::RefineRequest;
    use crate::tracker::identity_state::IdentityStatus;
    use crate::tracker::matching::TargetInstance;
    use ndarray::{Array3, ArrayView3};
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Sets each refined row's first feature from a per-frame score script;
    /// rows past the script get a clearly negative score.
    struct ScriptedStack {
        scores: RefCell<VecDeque<Vec<f32>>>,
        layers: usize,
    }

    impl ScriptedStack {
        fn new(frames: Vec<Vec<f32>>) -> Self {
            Self {
                scores: RefCell::new(frames.into()),
                layers: 1,
            }
        }
    }

    impl RefinementStack for ScriptedStack {
        fn num_layers(&self) -> usize {
            self.layers
        }

        fn refine(&self, request: RefineRequest<'_>) -> Vec<Array2<f32>> {
            let scores = self.scores.borrow_mut().pop_front().unwrap_or_default();
            let out = Array2::from_shape_fn(request.queries.dim(), |(r, c)| {
                if c == 0 { scores.get(r).copied().unwrap_or(-5.0) } else { 1.0 }
            });
            vec![out]
        }
    }

    /// Foreground logit is the first feature, background logit is zero.
    struct FirstFeatureHeads;

    impl PredictionHeads for FirstFeatureHeads {
        fn classify(&self, refined: ArrayView2<f32>) -> Array2<f32> {
            Array2::from_shape_fn((refined.nrows(), 2), |(r, c)| {
                if c == 0 { refined[[r, 0]] } else { 0.0 }
            })
        }

        fn embed_mask(
            &self,
            refined: ArrayView2<f32>,
            mask_features: ArrayView3<f32>,
        ) -> Array3<f32> {
            let (_, h, w) = mask_features.dim();
            Array3::ones((refined.nrows(), h, w))
        }
    }

    struct CopyReid;

    impl ReidHead for CopyReid {
        fn embed(&self, descriptors: ArrayView2<f32>) -> Array2<f32> {
            descriptors.to_owned()
        }
    }

    struct FixedMatcher(Correspondence);

    impl Matcher for FixedMatcher {
        fn assign(
            &mut self,
            _prediction: &FramePrediction<'_>,
            _targets: &[TargetInstance],
            _previous: &Correspondence,
        ) -> Result<Correspondence> {
            Ok(self.0.clone())
        }
    }

    fn config() -> TrackerConfig {
        TrackerConfig {
            hidden_dim: 2,
            mask_dim: 2,
            num_new_ins: 3,
            kick_out_frame_num: 2,
            kick_out_probability: 0.0,
            ..Default::default()
        }
    }

    fn tracker(
        config: TrackerConfig,
        frames: Vec<Vec<f32>>,
    ) -> QueryTracker<ScriptedStack, FirstFeatureHeads> {
        QueryTracker::new(
            config,
            ScriptedStack::new(frames),
            FirstFeatureHeads,
            IdentityProjection,
            QuerySeeds::zeros(2),
        )
        .unwrap()
    }

    fn frame(n: usize) -> FrameInput {
        FrameInput {
            embeds: Array2::from_shape_fn((n, 2), |(r, c)| if c == 0 { r as f32 } else { 1.0 }),
            valid: vec![true; n],
            pred_masks: Array3::ones((n, 2, 2)),
            mask_features: Array3::from_shape_fn((2, 2, 2), |(c, y, x)| (c + y + x) as f32 * 0.1),
        }
    }

    fn supervision(pairs: Vec<(usize, i64)>) -> FrameSupervision {
        FrameSupervision {
            targets: pairs
                .iter()
                .map(|&(_, id)| TargetInstance { id, label: 0 })
                .collect(),
            detection_targets: Correspondence::new(pairs),
            aux_detection_targets: vec![],
        }
    }

    #[test]
    fn test_first_frame_keeps_confident_queries() {
        let engine = tracker(config(), vec![vec![5.0, -5.0, -5.0]]);
        let mut session = engine.new_session(0);
        let out = engine.infer_step(&mut session, &frame(3)).unwrap();

        assert_eq!(out.num_queries(), 3);
        assert_eq!(out.track_ids.len(), 1);
        assert_eq!(out.disappear_tgt_id, -10000);
        assert!(out.correspondence.is_empty());
        assert_eq!(session.slots().queries.dim(), (1, 2));
        assert_eq!(session.slots().embeds.dim(), (1, 2));
        assert_eq!(session.frame_id(), 1);
    }

    #[test]
    fn test_carried_slot_dies_after_kick_out() {
        let engine = tracker(
            config(),
            vec![vec![5.0, -5.0, -5.0], vec![-5.0; 4], vec![-5.0; 4], vec![-5.0; 3]],
        );
        let mut session = engine.new_session(0);
        let id = engine.infer_step(&mut session, &frame(3)).unwrap().track_ids[0];

        let out = engine.infer_step(&mut session, &frame(3)).unwrap();
        assert_eq!(out.num_queries(), 4);
        assert_eq!(out.track_ids, vec![id]);
        assert_eq!(session.hub().get(id).unwrap().status, IdentityStatus::Inactive);

        let out = engine.infer_step(&mut session, &frame(3)).unwrap();
        assert!(out.track_ids.is_empty());
        let record = session.hub().get(id).unwrap();
        assert_eq!(record.status, IdentityStatus::Dead);
        assert_eq!(record.end_frame, Some(2));

        let out = engine.infer_step(&mut session, &frame(3)).unwrap();
        assert_eq!(out.num_queries(), 3);
    }

    #[test]
    fn test_detection_count_must_match_new_slots() {
        let engine = tracker(config(), vec![vec![5.0, -5.0, -5.0]]);
        let mut session = engine.new_session(0);
        engine.infer_step(&mut session, &frame(3)).unwrap();
        let err = engine.infer_step(&mut session, &frame(2)).unwrap_err();
        assert!(matches!(err, TrackError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_training_first_frame_follows_detection_targets() {
        let engine = tracker(config(), vec![vec![-5.0, -5.0, -5.0]]);
        let mut session = engine.new_session(0);
        let mut matcher = FixedMatcher(Correspondence::default());
        let out = engine
            .train_step(
                &mut session,
                &frame(3),
                &supervision(vec![(0, 10), (2, 11)]),
                &mut matcher,
                TrainingGate::Matched,
            )
            .unwrap();

        // validity follows the targets, not the scores
        assert_eq!(out.track_ids.len(), 2);
        assert_eq!(session.slots().targets, vec![Some(10), Some(11)]);
        assert_eq!(session.previous_correspondence().pairs(), &[(0, 10), (1, 11)]);
        let targets: Vec<Option<i64>> =
            session.reports().iter().map(|r| r.matched_target).collect();
        assert_eq!(targets, vec![Some(10), Some(11)]);
    }

    #[test]
    fn test_certain_kick_out_drops_every_match() {
        let engine = tracker(
            TrackerConfig {
                kick_out_probability: 1.0,
                ..config()
            },
            vec![vec![5.0, 5.0, 5.0]],
        );
        let mut session = engine.new_session(3);
        let mut matcher = FixedMatcher(Correspondence::default());
        let out = engine
            .train_step(
                &mut session,
                &frame(3),
                &supervision(vec![(0, 10), (1, 11)]),
                &mut matcher,
                TrainingGate::Matched,
            )
            .unwrap();
        assert!(out.track_ids.is_empty());
        assert!(session.hub().is_empty());
    }

    #[test]
    fn test_contrastive_pairs_with_reid_head() {
        let engine = tracker(config(), vec![vec![5.0, -5.0, -5.0], vec![5.0, -5.0, -5.0, -5.0]])
            .with_reid_head(CopyReid);
        let mut session = engine.new_session(0);
        let mut matcher = FixedMatcher(Correspondence::new(vec![(0, 10)]));
        let sup = supervision(vec![(0, 10)]);

        let first = engine
            .train_step(&mut session, &frame(3), &sup, &mut matcher, TrainingGate::Matched)
            .unwrap();
        assert!(first.contrastive.is_empty());

        let second = engine
            .train_step(&mut session, &frame(3), &sup, &mut matcher, TrainingGate::Matched)
            .unwrap();
        assert_eq!(second.contrastive.len(), 2);
        assert_eq!(second.contrastive[0].negatives.dim(), (3, 2));
        assert_eq!(second.contrastive[0].anchor, second.contrastive[1].positive);
        assert_eq!(second.track_ids, first.track_ids);
        assert_eq!(second.disappear_tgt_id, -10000);
    }

    #[test]
    fn test_layer_count_is_checked() {
        let mut stack = ScriptedStack::new(vec![]);
        stack.layers = 2;
        let engine = QueryTracker::new(
            config(),
            stack,
            FirstFeatureHeads,
            IdentityProjection,
            QuerySeeds::zeros(2),
        )
        .unwrap();
        let mut session = engine.new_session(0);
        assert!(engine.infer_step(&mut session, &frame(3)).is_err());
        assert!(session.is_fresh());
    }

    #[test]
    fn test_seed_width_is_checked() {
        let result = QueryTracker::new(
            config(),
            ScriptedStack::new(vec![]),
            FirstFeatureHeads,
            IdentityProjection,
            QuerySeeds::zeros(3),
        );
        assert!(matches!(result, Err(TrackError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_rejected_frame_keeps_disappearance_budget() {
        let engine = tracker(config(), vec![]);
        let mut session = engine.new_session(4);
        let sup = supervision(vec![(0, 10), (1, 11), (2, 12)]);
        let mut matcher = FixedMatcher(Correspondence::new(vec![(0, 10), (1, 11), (2, 12)]));

        engine
            .train_step(&mut session, &frame(3), &sup, &mut matcher, TrainingGate::Matched)
            .unwrap();

        // four detections against three new-instance slots
        let rejected =
            engine.train_step(&mut session, &frame(4), &sup, &mut matcher, TrainingGate::Matched);
        assert!(matches!(rejected, Err(TrackError::ShapeMismatch { .. })));
        assert!(session.disappeared.is_empty());
        assert_eq!(session.frame_id(), 1);

        let out = engine
            .train_step(&mut session, &frame(3), &sup, &mut matcher, TrainingGate::Matched)
            .unwrap();
        assert!([10, 11, 12].contains(&out.disappear_tgt_id));
        assert_eq!(session.disappeared, vec![out.disappear_tgt_id]);
    }

    #[test]
    fn test_confidence_gate_overrides_matches() {
        let engine = tracker(config(), vec![vec![5.0, -5.0, 5.0], vec![-5.0, 5.0]]);
        let mut session = engine.new_session(0);
        let mut matcher = FixedMatcher(Correspondence::new(vec![(0, 10)]));

        let first = engine
            .train_step(
                &mut session,
                &frame(3),
                &supervision(vec![(0, 10)]),
                &mut matcher,
                TrainingGate::Confidence,
            )
            .unwrap();
        // the unmatched but confident query starts an identity of its own
        assert_eq!(first.track_ids.len(), 2);
        let targets: Vec<Option<i64>> =
            session.reports().iter().map(|r| r.matched_target).collect();
        assert_eq!(targets, vec![Some(10), None]);

        // slot 0 stays matched to its target but scores low
        let second = engine
            .train_step(
                &mut session,
                &frame(3),
                &supervision(vec![(0, 10)]),
                &mut matcher,
                TrainingGate::Confidence,
            )
            .unwrap();
        assert_eq!(second.correspondence.target_of(0), Some(10));
        assert_eq!(second.track_ids, first.track_ids);
        assert_eq!(second.disappear_tgt_id, -10000);
        let hub = session.hub();
        assert_eq!(hub.get(first.track_ids[0]).unwrap().status, IdentityStatus::Inactive);
        assert_eq!(hub.get(first.track_ids[1]).unwrap().status, IdentityStatus::Active);
    }

    #[test]
    fn test_hidden_target_has_no_contrastive_pair() {
        let engine = tracker(config(), vec![vec![5.0, 6.0, 7.0]]).with_reid_head(CopyReid);
        let mut session = engine.new_session(2);
        let sup = supervision(vec![(0, 10), (1, 11), (2, 12)]);
        let mut matcher = FixedMatcher(Correspondence::new(vec![(0, 10), (1, 11), (2, 12)]));

        engine
            .train_step(&mut session, &frame(3), &sup, &mut matcher, TrainingGate::Matched)
            .unwrap();
        let out = engine
            .train_step(&mut session, &frame(3), &sup, &mut matcher, TrainingGate::Matched)
            .unwrap();

        assert_ne!(out.disappear_tgt_id, -10000);
        // one pair in each direction for the two targets still visible
        assert_eq!(out.contrastive.len(), 4);
        assert!(out.contrastive.iter().all(|t| t.negatives.nrows() == 5));
    }

    #[test]
    fn test_out_of_range_correspondence_is_rejected() {
        let engine = tracker(config(), vec![]);
        let mut session = engine.new_session(0);
        let mut matcher = FixedMatcher(Correspondence::default());
        let result = engine.train_step(
            &mut session,
            &frame(3),
            &supervision(vec![(0, 10), (5, 11)]),
            &mut matcher,
            TrainingGate::Matched,
        );
        assert!(matches!(result, Err(TrackError::ShapeMismatch { .. })));
        assert!(session.hub().is_empty());
        assert!(session.is_fresh());
    }
}
