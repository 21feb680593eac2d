//! Frame query set: track slots followed by new-instance slots.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, concatenate, s};

use crate::error::{Result, TrackError};
use crate::integration::RefineRequest;

#[derive(Debug, Clone)]
pub struct FrameQuerySet {
    pub queries: Array2<f32>,
    pub keys: Array2<f32>,
    pub query_pos: Option<Array2<f32>>,
    pub key_pos: Option<Array2<f32>>,
    pub attn_mask: Option<Array2<bool>>,
    pub num_tracks: usize,
}

impl FrameQuerySet {
    /// First frame of a sequence: detections refine themselves.
    pub fn from_detections(embeds: ArrayView2<f32>) -> Self {
        Self {
            queries: embeds.to_owned(),
            keys: embeds.to_owned(),
            query_pos: None,
            key_pos: None,
            attn_mask: None,
            num_tracks: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.queries.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.nrows() == 0
    }

    pub fn request(&self) -> RefineRequest<'_> {
        RefineRequest {
            queries: self.queries.view(),
            keys: self.keys.view(),
            query_pos: self.query_pos.as_ref().map(|p| p.view()),
            key_pos: self.key_pos.as_ref().map(|p| p.view()),
            attn_mask: self.attn_mask.as_ref().map(|m| m.view()),
        }
    }
}

/// Attention mask over keys laid out as detections then one disappearance
/// placeholder per track slot. Track slots may not see detections that are
/// not visible this frame; new-instance slots may not see placeholders.
pub fn attention_mask(num_tracks: usize, num_new: usize, visible: &[bool]) -> Array2<bool> {
    let num_det = visible.len();
    let mut mask = Array2::from_elem((num_tracks + num_new, num_det + num_tracks), false);
    for mut row in mask.slice_mut(s![..num_tracks, ..num_det]).rows_mut() {
        for (blocked, &v) in row.iter_mut().zip(visible) {
            *blocked = !v;
        }
    }
    mask.slice_mut(s![num_tracks.., num_det..]).fill(true);
    mask
}

/// `count` copies of `seed` as rows.
pub fn repeat_rows(seed: ArrayView1<f32>, count: usize) -> Array2<f32> {
    let mut out = Array2::zeros((count, seed.len()));
    for mut row in out.rows_mut() {
        row.assign(&seed);
    }
    out
}

/// Stack rows into a matrix; an empty input yields a `0 x dim` matrix.
pub fn stack_rows<'a>(
    rows: impl IntoIterator<Item = &'a Array1<f32>>,
    dim: usize,
) -> Result<Array2<f32>> {
    let rows: Vec<&Array1<f32>> = rows.into_iter().collect();
    let mut out = Array2::zeros((rows.len(), dim));
    for (mut dst, src) in out.rows_mut().into_iter().zip(rows) {
        if src.len() != dim {
            return Err(TrackError::shape("stacked row", dim, src.len()));
        }
        dst.assign(src);
    }
    Ok(out)
}

pub fn concat_rows<'a>(
    what: &'static str,
    top: ArrayView2<'a, f32>,
    bottom: ArrayView2<'a, f32>,
) -> Result<Array2<f32>> {
    concatenate(Axis(0), &[top, bottom]).map_err(|_| {
        TrackError::shape(
            what,
            format!("{} columns", top.ncols()),
            format!("{} columns", bottom.ncols()),
        )
    })
}
