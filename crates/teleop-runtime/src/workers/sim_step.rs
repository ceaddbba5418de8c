//! Sim-step worker: advances the physics engine one step per cycle.

use teleop_hal::{JointCalibration, Simulator};
use teleop_types::{MsgType, Payload, TeleopError};

use crate::telemetry::{log_joint_vector, TelemetrySink};
use crate::worker::Worker;

/// Drives the simulator with the follower's motor positions and publishes
/// the simulated joint state (and, when rendering is enabled, the
/// rendered planes).
///
/// The output kind is fixed at construction: rendering on produces
/// [`MsgType::JointAnglesRenderWithForce`], rendering off produces the
/// lighter [`MsgType::JointAnglesWithForce`].
pub struct SimStepWorker {
    sim: Box<dyn Simulator>,
    calibration: JointCalibration,
    render: bool,
}

impl SimStepWorker {
    pub fn new(sim: Box<dyn Simulator>, render: bool) -> Self {
        Self {
            sim,
            calibration: JointCalibration::default(),
            render,
        }
    }
}

impl Worker for SimStepWorker {
    fn name(&self) -> &str {
        "sim"
    }

    fn input_type(&self) -> MsgType {
        MsgType::Position
    }

    fn output_type(&self) -> MsgType {
        if self.render {
            MsgType::JointAnglesRenderWithForce
        } else {
            MsgType::JointAnglesWithForce
        }
    }

    fn process(&mut self, payload: Payload) -> Result<Payload, TeleopError> {
        let actual = payload.msg_type();
        let Payload::Position(control_pos) = payload else {
            return Err(TeleopError::Validation {
                worker: self.name().to_string(),
                expected: self.input_type(),
                actual,
            });
        };

        // The engine speaks radians; the bus speaks encoder steps.
        let control_qpos = self.calibration.pos_to_qpos(&control_pos);
        let out = self.sim.step(&control_qpos)?;

        if self.render {
            Ok(Payload::JointAnglesRenderWithForce {
                qpos: out.qpos,
                force: out.control_force,
                render: out.render.unwrap_or_default(),
            })
        } else {
            Ok(Payload::JointAnglesWithForce {
                qpos: out.qpos,
                force: out.control_force,
            })
        }
    }

    fn publish_data(&mut self, sink: &mut dyn TelemetrySink, step: u64, result: &Payload) {
        let (qpos, force, render) = match result {
            Payload::JointAnglesRenderWithForce {
                qpos,
                force,
                render,
            } => (qpos, force, Some(render)),
            Payload::JointAnglesWithForce { qpos, force } => (qpos, force, None),
            _ => return,
        };
        log_joint_vector(sink, "/sim/qpos", step, qpos);
        log_joint_vector(sink, "/sim/control_force", step, force);
        if let Some(render) = render {
            for (plane, frame) in [
                ("rgb", &render.color),
                ("depth", &render.depth),
                ("segmentation", &render.segmentation),
                ("normal", &render.normal),
            ] {
                if let Some(frame) = frame {
                    sink.log_image(&format!("/sim/{plane}/video"), step, frame);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RecordingSink;
    use teleop_hal::stubs::HeadlessSimulator;

    #[test]
    fn rendering_worker_produces_render_payload() {
        let mut worker = SimStepWorker::new(Box::new(HeadlessSimulator::new(8, 6, true)), true);
        assert_eq!(worker.output_type(), MsgType::JointAnglesRenderWithForce);

        let result = worker.process(Payload::Position(vec![2047; 6])).unwrap();
        let Payload::JointAnglesRenderWithForce { qpos, force, render } = result else {
            panic!("wrong payload kind");
        };
        assert_eq!(qpos.len(), 6);
        assert!(qpos.iter().all(|q| q.abs() < 1e-6), "mid-scale pose is zero");
        assert_eq!(force.len(), 6);
        assert!(render.color.is_some());
    }

    #[test]
    fn headless_worker_produces_light_payload() {
        let mut worker = SimStepWorker::new(Box::new(HeadlessSimulator::new(8, 6, false)), false);
        assert_eq!(worker.output_type(), MsgType::JointAnglesWithForce);

        let result = worker.process(Payload::Position(vec![2047; 6])).unwrap();
        assert_eq!(result.msg_type(), MsgType::JointAnglesWithForce);
    }

    #[test]
    fn publish_data_logs_planes_and_joints() {
        let sink = RecordingSink::new();
        let mut handle = sink.clone();
        let mut worker = SimStepWorker::new(Box::new(HeadlessSimulator::new(8, 6, true)), true);
        let result = worker.process(Payload::Position(vec![2047; 6])).unwrap();
        worker.publish_data(&mut handle, 4, &result);

        let seen = sink.snapshot();
        assert_eq!(seen.scalars.len(), 12, "qpos + control force per joint");
        assert_eq!(seen.images.len(), 4, "one image per rendered plane");
        assert!(seen.images.iter().any(|(path, ..)| path == "/sim/depth/video"));
    }
}
