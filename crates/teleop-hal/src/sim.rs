//! [`Simulator`] and [`MirrorRig`] – the physics-engine seams.

use teleop_types::{ImageFrame, RenderSet, TeleopError};

/// Joint state and rendered planes produced by one simulation step.
#[derive(Debug, Clone)]
pub struct SimStepOutput {
    /// Post-step joint angles, radians.
    pub qpos: Vec<f32>,
    /// Per-joint control force applied during the step.
    pub control_force: Vec<f32>,
    /// Rendered planes, `None` when the engine runs without a camera.
    pub render: Option<RenderSet>,
}

/// A physics/rendering engine driven one step at a time.
///
/// Any engine that can apply a joint-position control input, advance its
/// world, and report the resulting joint state satisfies this interface;
/// rendering is optional.
pub trait Simulator: Send {
    /// Apply `control_qpos` (radians) and advance the world by one step.
    fn step(&mut self, control_qpos: &[f32]) -> Result<SimStepOutput, TeleopError>;
}

/// Result of mirroring one arm's pose onto another robot.
#[derive(Debug, Clone)]
pub struct MirrorStepOutput {
    /// Joint angles of the primary arm after the step.
    pub primary_qpos: Vec<f32>,
    /// Joint angles the mirrored robot solved to via inverse kinematics.
    pub mirrored_qpos: Vec<f32>,
    /// One rendered view of the combined scene.
    pub view: ImageFrame,
}

/// A rig that runs forward kinematics on the primary arm and inverse
/// kinematics on a second robot so the second robot shadows the first.
pub trait MirrorRig: Send {
    /// Apply `control_qpos` to the primary arm and solve the mirror pose.
    fn mirror_step(&mut self, control_qpos: &[f32]) -> Result<MirrorStepOutput, TeleopError>;
}
