//! Decode → suppress → select → align, for one image at a time.

use crate::alignment::{self, AlignError, CanonicalLayout};
use crate::config::DetectionConfig;
use crate::decoder::{self, DecodeError, Letterbox, StrideTensors};
use crate::nms::{self, NmsError};
use crate::types::{AffineTransform, BoundingBox, Candidate};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("nms: {0}")]
    Nms(#[from] NmsError),
    #[error("alignment: {0}")]
    Align(#[from] AlignError),
}

/// Decode and de-duplicate faces, highest score first.
pub fn detect_faces(
    tensors: &[StrideTensors<'_>],
    letterbox: &Letterbox,
    config: &DetectionConfig,
) -> Result<Vec<Candidate>, PipelineError> {
    let candidates = decoder::decode(tensors, letterbox, config.score_threshold)?;
    let keep = suppress_candidates(&candidates, config.iou_threshold)?;

    let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    Ok(keep.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// The face with the largest box among the survivors of suppression,
/// or `None` when no face was detected.
pub fn detect_largest_face(
    tensors: &[StrideTensors<'_>],
    letterbox: &Letterbox,
    config: &DetectionConfig,
) -> Result<Option<Candidate>, PipelineError> {
    let candidates = decoder::decode(tensors, letterbox, config.score_threshold)?;
    let keep = suppress_candidates(&candidates, config.iou_threshold)?;

    let boxes: Vec<BoundingBox> = candidates.iter().map(|c| c.bbox).collect();
    let best = nms::select_largest(&boxes, &keep).map(|i| candidates[i].clone());
    match &best {
        Some(face) => tracing::debug!(score = face.score, bbox = ?face.bbox, "selected face"),
        None => tracing::debug!("no face detected"),
    }
    Ok(best)
}

/// Similarity transform taking `candidate`'s landmarks into `layout`.
pub fn alignment_for(candidate: &Candidate, layout: &CanonicalLayout) -> Result<AffineTransform, PipelineError> {
    Ok(alignment::estimate_similarity_transform(
        &candidate.landmarks,
        &layout.points,
    )?)
}

fn suppress_candidates(candidates: &[Candidate], iou_threshold: f32) -> Result<Vec<usize>, NmsError> {
    let boxes: Vec<BoundingBox> = candidates.iter().map(|c| c.bbox).collect();
    let scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
    nms::suppress(&boxes, &scores, iou_threshold)
}
