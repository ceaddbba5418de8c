//! [`JointCalibration`] – encoder-step ↔ radian conversion.
//!
//! The servo bus reports 12-bit encoder steps (4096 per revolution); the
//! simulator and kinematics rigs speak radians. The mapping is linear per
//! joint: an offset at the mid-scale reference pose plus a per-joint
//! direction sign for joints whose positive encoder direction opposes the
//! model's positive rotation.

/// Encoder steps per full revolution of a joint.
const STEPS_PER_TURN: f32 = 4096.0;

/// Per-joint linear calibration between encoder steps and radians.
#[derive(Debug, Clone)]
pub struct JointCalibration {
    /// Encoder reading at each joint's zero-angle reference pose.
    mid: Vec<i32>,
    /// Per-joint direction sign (+1.0 or -1.0).
    direction: Vec<f32>,
    steps_per_rad: f32,
}

impl Default for JointCalibration {
    /// Calibration of the six-axis arm: mid-scale reference at 2047 on
    /// every joint, shoulder pan reversed.
    fn default() -> Self {
        Self {
            mid: vec![2047; 6],
            direction: vec![-1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
            steps_per_rad: STEPS_PER_TURN / std::f32::consts::TAU,
        }
    }
}

impl JointCalibration {
    /// Build a calibration from explicit per-joint references and signs.
    pub fn new(mid: Vec<i32>, direction: Vec<f32>) -> Self {
        Self {
            mid,
            direction,
            steps_per_rad: STEPS_PER_TURN / std::f32::consts::TAU,
        }
    }

    /// Convert encoder steps to radians.
    pub fn pos_to_qpos(&self, pos: &[i32]) -> Vec<f32> {
        pos.iter()
            .enumerate()
            .map(|(i, &p)| {
                let delta = (p - self.mid_at(i)) as f32;
                self.direction_at(i) * delta / self.steps_per_rad
            })
            .collect()
    }

    /// Convert radians to encoder steps, rounding to the nearest step.
    pub fn qpos_to_pos(&self, qpos: &[f32]) -> Vec<i32> {
        qpos.iter()
            .enumerate()
            .map(|(i, &q)| {
                let steps = self.direction_at(i) * q * self.steps_per_rad;
                self.mid_at(i) + steps.round() as i32
            })
            .collect()
    }

    fn mid_at(&self, joint: usize) -> i32 {
        self.mid.get(joint).copied().unwrap_or(2047)
    }

    fn direction_at(&self, joint: usize) -> f32 {
        self.direction.get(joint).copied().unwrap_or(1.0)
    }
}
