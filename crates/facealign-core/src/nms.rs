//! Greedy Non-Maximum Suppression and best-face selection.

use crate::types::BoundingBox;
use std::cmp::Ordering;
use thiserror::Error;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.4;

#[derive(Error, Debug, PartialEq)]
pub enum NmsError {
    #[error("{boxes} boxes but {scores} scores")]
    LengthMismatch { boxes: usize, scores: usize },
    #[error("IoU threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f32),
    #[error("candidate {0} has a non-finite score")]
    NonFiniteScore(usize),
}

/// Compute Intersection-over-Union between two bounding boxes.
///
/// Returns 0 whenever the union is not strictly positive, so degenerate
/// boxes never count as overlapping.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter_area = inter_w * inter_h;

    let union_area = a.area() + b.area() - inter_area;
    if union_area > 0.0 {
        let ratio = inter_area / union_area;
        if ratio.is_finite() {
            return ratio;
        }
    }
    0.0
}

/// Non-Maximum Suppression over parallel `boxes` / `scores` sequences.
///
/// Candidates are visited by descending score, equal scores by ascending
/// index. Each visited candidate that is still live is kept and suppresses
/// every later live candidate whose IoU with it is strictly greater than
/// `iou_threshold`. Returns kept indices in visiting order.
pub fn suppress(boxes: &[BoundingBox], scores: &[f32], iou_threshold: f32) -> Result<Vec<usize>, NmsError> {
    if !(0.0..=1.0).contains(&iou_threshold) {
        return Err(NmsError::InvalidThreshold(iou_threshold));
    }
    if boxes.len() != scores.len() {
        return Err(NmsError::LengthMismatch {
            boxes: boxes.len(),
            scores: scores.len(),
        });
    }
    if let Some(i) = scores.iter().position(|s| !s.is_finite()) {
        return Err(NmsError::NonFiniteScore(i));
    }

    let order = descending_order(scores);
    let mut suppressed = vec![false; order.len()];
    let mut keep = Vec::new();

    for (rank, &i) in order.iter().enumerate() {
        if suppressed[rank] {
            continue;
        }
        keep.push(i);

        for (later, &j) in order.iter().enumerate().skip(rank + 1) {
            if suppressed[later] {
                continue;
            }
            let overlap = iou(&boxes[i], &boxes[j]);
            if overlap > iou_threshold {
                tracing::trace!(kept = i, suppressed = j, iou = overlap, "suppressed candidate");
                suppressed[later] = true;
            }
        }
    }

    tracing::debug!(candidates = boxes.len(), kept = keep.len(), iou_threshold, "nms");
    Ok(keep)
}

/// Indices sorted by descending score, ties by ascending index.
fn descending_order(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&i, &j| {
        scores[j]
            .partial_cmp(&scores[i])
            .unwrap_or(Ordering::Equal)
            .then(i.cmp(&j))
    });
    order
}

/// Pick the kept candidate with the largest box area.
///
/// The first index in `kept` wins ties; indices past the end of `boxes`
/// are skipped. Returns `None` when no valid index survived suppression,
/// meaning no face was found.
pub fn select_largest(boxes: &[BoundingBox], kept: &[usize]) -> Option<usize> {
    let mut valid = kept.iter().filter_map(|&idx| boxes.get(idx).map(|b| (idx, b.area())));
    let (mut best, first_area) = valid.next()?;
    let mut max_area = first_area.max(-1.0);
    for (idx, area) in valid {
        if area > max_area {
            max_area = area;
            best = idx;
        }
    }
    Some(best)
}
