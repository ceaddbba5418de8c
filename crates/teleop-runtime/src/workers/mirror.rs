//! Mirror-kinematics worker: shadows the arm's pose onto a second robot.

use teleop_hal::MirrorRig;
use teleop_types::{MsgType, Payload, TeleopError};

use crate::telemetry::{log_joint_vector, TelemetrySink};
use crate::worker::Worker;

/// Applies the control joint angles to the primary rig, solves the
/// mirrored robot's pose via inverse kinematics, and publishes both joint
/// vectors plus one rendered view.
pub struct MirrorKinematicsWorker {
    rig: Box<dyn MirrorRig>,
}

impl MirrorKinematicsWorker {
    pub fn new(rig: Box<dyn MirrorRig>) -> Self {
        Self { rig }
    }
}

impl Worker for MirrorKinematicsWorker {
    fn name(&self) -> &str {
        "kinematics"
    }

    fn input_type(&self) -> MsgType {
        MsgType::JointAngles
    }

    fn output_type(&self) -> MsgType {
        MsgType::DualJointAnglesWithImage
    }

    fn process(&mut self, payload: Payload) -> Result<Payload, TeleopError> {
        let actual = payload.msg_type();
        let Payload::JointAngles(control_qpos) = payload else {
            return Err(TeleopError::Validation {
                worker: self.name().to_string(),
                expected: self.input_type(),
                actual,
            });
        };

        let out = self.rig.mirror_step(&control_qpos)?;
        Ok(Payload::DualJointAnglesWithImage {
            primary_qpos: out.primary_qpos,
            mirrored_qpos: out.mirrored_qpos,
            image: out.view,
        })
    }

    fn publish_data(&mut self, sink: &mut dyn TelemetrySink, step: u64, result: &Payload) {
        if let Payload::DualJointAnglesWithImage {
            primary_qpos,
            mirrored_qpos,
            image,
        } = result
        {
            log_joint_vector(sink, "/sim/qpos", step, primary_qpos);
            log_joint_vector(sink, "/kinematics/qpos", step, mirrored_qpos);
            sink.log_image("/kinematics/video", step, image);
        }
    }
}
