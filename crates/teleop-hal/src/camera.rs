//! Generic [`Camera`] trait for image-capture hardware.

use teleop_types::{ImageFrame, TeleopError};

/// A camera or image-capture device.
pub trait Camera: Send {
    /// Stable identifier for this camera, e.g. `"webcam1"`.
    fn id(&self) -> &str;

    /// Capture and return the next available frame.
    ///
    /// # Errors
    ///
    /// Returns [`TeleopError::Hardware`] if the frame cannot be captured
    /// (device disconnected, buffer unavailable).
    fn capture(&mut self) -> Result<ImageFrame, TeleopError>;
}
