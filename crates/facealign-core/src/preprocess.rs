//! Model input tensors for the detector and the recognizer.
//!
//! The inference engine itself lives outside this crate; these helpers only
//! build the NCHW float tensors it expects.

use crate::decoder::{Letterbox, DETECTOR_INPUT_SIZE};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

const INPUT_MEAN: f32 = 127.5;
const INPUT_STD: f32 = 128.0;
/// Letterbox fill (#808080).
const PAD_VALUE: u8 = 128;

fn normalize(pixel: u8) -> f32 {
    (pixel as f32 - INPUT_MEAN) / INPUT_STD
}

/// Letterbox an RGB image into the 640×640 detector input.
///
/// Returns a `1×3×640×640` RGB tensor and the letterbox parameters needed
/// to map detections back to `image` coordinates. The resized image lands
/// on whole pixels, so the returned padding is the floored offset it was
/// actually drawn at rather than the fractional one from [`Letterbox::fit`].
pub fn detector_input(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let size = DETECTOR_INPUT_SIZE;
    let fit = Letterbox::fit(image.width(), image.height());

    let new_w = ((image.width() as f32 * fit.scale).round() as u32).clamp(1, size as u32);
    let new_h = ((image.height() as f32 * fit.scale).round() as u32).clamp(1, size as u32);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let off_x = fit.pad_x.floor().max(0.0) as usize;
    let off_y = fit.pad_y.floor().max(0.0) as usize;
    let letterbox = Letterbox {
        scale: fit.scale,
        pad_x: off_x as f32,
        pad_y: off_y as f32,
    };

    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), normalize(PAD_VALUE));
    for (x, y, px) in resized.enumerate_pixels() {
        let (tx, ty) = (off_x + x as usize, off_y + y as usize);
        if tx >= size || ty >= size {
            continue;
        }
        for ch in 0..3 {
            tensor[[0, ch, ty, tx]] = normalize(px[ch]);
        }
    }

    tracing::trace!(
        width = image.width(),
        height = image.height(),
        scale = letterbox.scale,
        pad_x = letterbox.pad_x,
        pad_y = letterbox.pad_y,
        "letterboxed detector input"
    );

    (tensor, letterbox)
}

/// Convert an aligned face crop into a `1×3×H×W` recognizer tensor.
///
/// Channels are written in BGR order.
pub fn recognizer_input(aligned: &RgbImage) -> Array4<f32> {
    let (w, h) = (aligned.width() as usize, aligned.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, px) in aligned.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = normalize(px[2]);
        tensor[[0, 1, y, x]] = normalize(px[1]);
        tensor[[0, 2, y, x]] = normalize(px[0]);
    }
    tensor
}
