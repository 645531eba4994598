//! JSON dumps of raw detector outputs, for replaying through the pipeline
//! without an inference engine.

use anyhow::{Context, Result};
use facealign_core::{Letterbox, StrideTensors};
use serde::Deserialize;
use std::path::Path;

/// Detector outputs for one image.
///
/// ```json
/// {
///   "image_width": 1280,
///   "image_height": 960,
///   "outputs": [
///     { "stride": 8, "scores": [...], "boxes": [...], "landmarks": [...] },
///     ...
///   ]
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct TensorDump {
    pub image_width: u32,
    pub image_height: u32,
    pub outputs: Vec<StrideDump>,
}

#[derive(Debug, Deserialize)]
pub struct StrideDump {
    pub stride: usize,
    pub scores: Vec<f32>,
    pub boxes: Vec<f32>,
    pub landmarks: Vec<f32>,
}

impl TensorDump {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let dump: Self = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("parsing tensor dump {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            width = dump.image_width,
            height = dump.image_height,
            strides = ?dump.outputs.iter().map(|o| o.stride).collect::<Vec<_>>(),
            "loaded tensor dump"
        );
        Ok(dump)
    }

    pub fn letterbox(&self) -> Letterbox {
        Letterbox::fit(self.image_width, self.image_height)
    }

    pub fn views(&self) -> Vec<StrideTensors<'_>> {
        self.outputs
            .iter()
            .map(|o| StrideTensors {
                stride: o.stride,
                scores: &o.scores,
                boxes: &o.boxes,
                landmarks: &o.landmarks,
            })
            .collect()
    }
}
