//! Generic [`MotorBus`] trait for a chain of position-controlled servos.

use teleop_types::TeleopError;

/// A daisy-chained servo bus (one teleoperation arm).
///
/// Position values are integer encoder steps; the pipeline transports
/// them as opaque numeric vectors and never interprets them. Conversion
/// to radians happens only where a consumer needs angles, via
/// [`JointCalibration`][crate::JointCalibration].
pub trait MotorBus: Send {
    /// Stable identifier for this bus, e.g. `"leader"` or `"follower"`.
    fn id(&self) -> &str;

    /// Read the current position of every joint, in encoder steps.
    ///
    /// # Errors
    ///
    /// Returns [`TeleopError::Hardware`] when the bus cannot be read
    /// (disconnected port, timeout, checksum failure).
    fn get_position(&mut self) -> Result<Vec<i32>, TeleopError>;

    /// Command every joint to the given target positions.
    fn set_position(&mut self, target: &[i32]) -> Result<(), TeleopError>;

    /// Read the present control force (load) of every joint, in device
    /// units.
    fn get_control_force(&mut self) -> Result<Vec<i32>, TeleopError>;
}
