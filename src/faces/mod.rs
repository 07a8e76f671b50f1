//! Face detection and person clustering.

pub mod clustering;
pub mod detector;

pub use clustering::{cosine_similarity, CentroidIndex};
pub use detector::{BoundingBox, DetectedFace, FaceDetector};
