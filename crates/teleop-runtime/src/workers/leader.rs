//! Leader-read worker: samples the leader arm once per tick.

use teleop_hal::{JointCalibration, MotorBus};
use teleop_types::{MsgType, Payload, TeleopError};

use crate::telemetry::{log_joint_vector, TelemetrySink};
use crate::worker::Worker;

/// Reads the leader arm's position on every scheduler tick and forwards
/// it as the control command for the rest of the chain.
pub struct LeaderReadWorker {
    bus: Box<dyn MotorBus>,
    calibration: JointCalibration,
}

impl LeaderReadWorker {
    pub fn new(bus: Box<dyn MotorBus>) -> Self {
        Self {
            bus,
            calibration: JointCalibration::default(),
        }
    }
}

impl Worker for LeaderReadWorker {
    fn name(&self) -> &str {
        "leader"
    }

    fn input_type(&self) -> MsgType {
        MsgType::Empty
    }

    fn output_type(&self) -> MsgType {
        MsgType::Position
    }

    fn process(&mut self, _payload: Payload) -> Result<Payload, TeleopError> {
        let pos = self.bus.get_position()?;
        Ok(Payload::Position(pos))
    }

    fn publish_data(&mut self, sink: &mut dyn TelemetrySink, step: u64, result: &Payload) {
        if let Payload::Position(pos) = result {
            let qpos = self.calibration.pos_to_qpos(pos);
            log_joint_vector(sink, "/leader/qpos", step, &qpos);
        }
    }
}
