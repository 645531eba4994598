//! facealign-core — Geometric post-processing for SCRFD-style face detection.
//!
//! Decodes multi-stride detector tensors into face candidates, removes
//! duplicates with greedy NMS, and estimates the similarity transform that
//! aligns a face to a canonical landmark layout. Model inference is left to
//! the caller.

pub mod alignment;
pub mod config;
pub mod decoder;
pub mod nms;
pub mod pipeline;
pub mod preprocess;
pub mod types;

pub use alignment::{estimate_similarity_transform, AlignError, CanonicalLayout};
pub use config::{ConfigError, DetectionConfig, PipelineConfig};
pub use decoder::{decode, DecodeError, Letterbox, StrideTensors};
pub use nms::{select_largest, suppress, NmsError};
pub use pipeline::{alignment_for, detect_faces, detect_largest_face, PipelineError};
pub use types::{AffineTransform, BoundingBox, Candidate, Landmark, Point};
