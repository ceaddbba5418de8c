//! [`Detector`] – the object-detection model seam.

use teleop_types::{ImageFrame, TeleopError};

/// Geometry of one detection result.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionShape {
    /// Axis-aligned bounding box in pixel coordinates.
    Box { x1: f32, y1: f32, x2: f32, y2: f32 },
    /// Pose keypoints in pixel coordinates.
    Keypoints(Vec<[f32; 2]>),
}

/// One detected object or pose.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub shape: DetectionShape,
}

/// An object-detection model: decoded image in, labeled shapes out.
pub trait Detector: Send {
    /// Run inference on one frame.
    fn detect(&mut self, frame: &ImageFrame) -> Result<Vec<Detection>, TeleopError>;
}
