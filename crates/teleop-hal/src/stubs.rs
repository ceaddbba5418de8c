//! Simulated stub drivers for headless runs and CI.
//!
//! Every external-collaborator trait has a stub that records commands and
//! returns plausible, deterministic state, so the full worker topology
//! can be exercised without an arm, a webcam, a physics engine, or a
//! detection model attached.

use tracing::debug;

use teleop_types::{ImageFrame, RenderSet, TeleopError};

use crate::camera::Camera;
use crate::detector::{Detection, DetectionShape, Detector};
use crate::motor::MotorBus;
use crate::sim::{MirrorRig, MirrorStepOutput, SimStepOutput, Simulator};

// ────────────────────────────────────────────────────────────────────────────
// Motor bus
// ────────────────────────────────────────────────────────────────────────────

/// A simulated servo chain that tracks the last commanded position
/// instantly and reports zero load. Always succeeds.
pub struct SimMotorBus {
    id: String,
    position: Vec<i32>,
}

impl SimMotorBus {
    /// Create a simulated bus parked at the mid-scale reference pose.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            position: vec![2047; 6],
        }
    }
}

impl MotorBus for SimMotorBus {
    fn id(&self) -> &str {
        &self.id
    }

    fn get_position(&mut self) -> Result<Vec<i32>, TeleopError> {
        Ok(self.position.clone())
    }

    fn set_position(&mut self, target: &[i32]) -> Result<(), TeleopError> {
        debug!(bus = %self.id, ?target, "sim bus commanded");
        self.position = target.to_vec();
        Ok(())
    }

    fn get_control_force(&mut self) -> Result<Vec<i32>, TeleopError> {
        Ok(vec![0; self.position.len()])
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Camera
// ────────────────────────────────────────────────────────────────────────────

/// A simulated camera producing a deterministic gradient that shifts one
/// step per capture, so consecutive frames are distinguishable in tests.
pub struct SimCamera {
    id: String,
    width: u32,
    height: u32,
    captures: u8,
}

impl SimCamera {
    pub fn new(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            captures: 0,
        }
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<ImageFrame, TeleopError> {
        self.captures = self.captures.wrapping_add(1);
        Ok(gradient_frame(self.width, self.height, self.captures))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulator
// ────────────────────────────────────────────────────────────────────────────

/// A headless physics stub: joints converge to the control input
/// instantly, control force is zero, and rendering (when enabled) returns
/// solid planes.
pub struct HeadlessSimulator {
    width: u32,
    height: u32,
    render: bool,
    steps: u8,
}

impl HeadlessSimulator {
    pub fn new(width: u32, height: u32, render: bool) -> Self {
        Self {
            width,
            height,
            render,
            steps: 0,
        }
    }
}

impl Simulator for HeadlessSimulator {
    fn step(&mut self, control_qpos: &[f32]) -> Result<SimStepOutput, TeleopError> {
        self.steps = self.steps.wrapping_add(1);
        let render = self.render.then(|| RenderSet {
            color: Some(gradient_frame(self.width, self.height, self.steps)),
            depth: Some(gradient_frame(self.width, self.height, self.steps.wrapping_add(64))),
            segmentation: Some(gradient_frame(self.width, self.height, self.steps.wrapping_add(128))),
            normal: Some(gradient_frame(self.width, self.height, self.steps.wrapping_add(192))),
        });
        Ok(SimStepOutput {
            qpos: control_qpos.to_vec(),
            control_force: vec![0.0; control_qpos.len()],
            render,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Mirror rig
// ────────────────────────────────────────────────────────────────────────────

/// A kinematics stub: the primary arm tracks the control input and the
/// mirrored robot "solves" to the negated pose, standing in for a real
/// inverse-kinematics result.
pub struct HeadlessMirrorRig {
    width: u32,
    height: u32,
    steps: u8,
}

impl HeadlessMirrorRig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            steps: 0,
        }
    }
}

impl MirrorRig for HeadlessMirrorRig {
    fn mirror_step(&mut self, control_qpos: &[f32]) -> Result<MirrorStepOutput, TeleopError> {
        self.steps = self.steps.wrapping_add(1);
        Ok(MirrorStepOutput {
            primary_qpos: control_qpos.to_vec(),
            mirrored_qpos: control_qpos.iter().map(|q| -q).collect(),
            view: gradient_frame(self.width, self.height, self.steps),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Detector
// ────────────────────────────────────────────────────────────────────────────

/// Task the stub detector mimics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubDetectorTask {
    Boxes,
    Pose,
}

/// A detector stub returning one fixed detection centered in the frame.
pub struct StubDetector {
    task: StubDetectorTask,
}

impl StubDetector {
    pub fn boxes() -> Self {
        Self {
            task: StubDetectorTask::Boxes,
        }
    }

    pub fn pose() -> Self {
        Self {
            task: StubDetectorTask::Pose,
        }
    }
}

impl Detector for StubDetector {
    fn detect(&mut self, frame: &ImageFrame) -> Result<Vec<Detection>, TeleopError> {
        let (w, h) = (frame.width as f32, frame.height as f32);
        let shape = match self.task {
            StubDetectorTask::Boxes => DetectionShape::Box {
                x1: w * 0.25,
                y1: h * 0.25,
                x2: w * 0.75,
                y2: h * 0.75,
            },
            StubDetectorTask::Pose => DetectionShape::Keypoints(vec![
                [w * 0.5, h * 0.25],
                [w * 0.4, h * 0.5],
                [w * 0.6, h * 0.5],
            ]),
        };
        Ok(vec![Detection {
            label: "object".to_string(),
            confidence: 0.9,
            shape,
        }])
    }
}

fn gradient_frame(width: u32, height: u32, seed: u8) -> ImageFrame {
    let len = (width * height * 3) as usize;
    ImageFrame {
        width,
        height,
        data: (0..len).map(|i| seed.wrapping_add(i as u8)).collect(),
    }
}
