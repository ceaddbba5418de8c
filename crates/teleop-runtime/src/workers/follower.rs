//! Follower-control worker: drives the follower arm and fans the cycle
//! out to the rest of the topology.
//!
//! This is the one worker whose output channels carry *different*
//! payloads, so it overrides `publish_outputs`: an empty trigger to each
//! webcam channel, the raw motor position to the simulation channel, and
//! the calibrated joint angles to the mirror-kinematics channel — all
//! stamped with the same propagated deadline and step.

use chrono::{DateTime, Utc};
use tracing::debug;

use teleop_bus::{ChannelKind, FifoChannel};
use teleop_hal::{JointCalibration, MotorBus};
use teleop_types::{Envelope, MsgType, Payload, TeleopError};

use crate::telemetry::{log_joint_vector, TelemetrySink};
use crate::worker::Worker;

/// Commands the follower arm with the leader's position, reads back the
/// follower's actual position and control force, and triggers the
/// downstream capture/simulation workers.
pub struct FollowerControlWorker {
    bus: Box<dyn MotorBus>,
    calibration: JointCalibration,
    webcam_count: usize,
    sim: bool,
    mirror: bool,
}

impl FollowerControlWorker {
    pub fn new(bus: Box<dyn MotorBus>, camera_ids: &[u8], sim: bool, mirror: bool) -> Self {
        Self {
            bus,
            calibration: JointCalibration::default(),
            webcam_count: camera_ids.len(),
            sim,
            mirror,
        }
    }

    /// Output channel kinds in the order this worker fans out to them.
    /// The harness's output vector must be wired in exactly this order.
    pub fn output_kinds(camera_ids: &[u8], sim: bool, mirror: bool) -> Vec<ChannelKind> {
        let mut kinds: Vec<ChannelKind> = camera_ids
            .iter()
            .map(|&id| ChannelKind::WebcamCapture(id))
            .collect();
        if sim {
            kinds.push(ChannelKind::SimStep);
        }
        if mirror {
            kinds.push(ChannelKind::MirrorKinematics);
        }
        kinds
    }
}

impl Worker for FollowerControlWorker {
    fn name(&self) -> &str {
        "follower"
    }

    fn input_type(&self) -> MsgType {
        MsgType::Position
    }

    fn output_type(&self) -> MsgType {
        MsgType::PositionWithForce
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
        self.bus.set_position(&control_pos)?;
        let pos = self.bus.get_position()?;
        let force = self.bus.get_control_force()?;
        Ok(Payload::PositionWithForce { pos, force })
    }

    fn publish_outputs(
        &mut self,
        outputs: &mut [FifoChannel],
        result: &Payload,
        deadline: DateTime<Utc>,
        step: u64,
    ) -> Result<(), TeleopError> {
        let Payload::PositionWithForce { pos, .. } = result else {
            return Ok(());
        };

        let mut outputs = outputs.iter_mut();
        for _ in 0..self.webcam_count {
            let Some(channel) = outputs.next() else { break };
            channel.write(&Envelope::new(Payload::Empty, deadline, step))?;
        }
        if self.sim {
            if let Some(channel) = outputs.next() {
                channel.write(&Envelope::new(Payload::Position(pos.clone()), deadline, step))?;
            }
        }
        if self.mirror {
            if let Some(channel) = outputs.next() {
                let qpos = self.calibration.pos_to_qpos(pos);
                channel.write(&Envelope::new(Payload::JointAngles(qpos), deadline, step))?;
            }
        }
        debug!(worker = "follower", step, "cycle fanned out");
        Ok(())
    }

    fn publish_data(&mut self, sink: &mut dyn TelemetrySink, step: u64, result: &Payload) {
        if let Payload::PositionWithForce { pos, force } = result {
            let qpos = self.calibration.pos_to_qpos(pos);
            log_joint_vector(sink, "/follower/qpos", step, &qpos);
            let force: Vec<f32> = force.iter().map(|&f| f as f32).collect();
            log_joint_vector(sink, "/follower/control_force", step, &force);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RecordingSink;
    use std::thread;
    use teleop_hal::stubs::SimMotorBus;

    #[test]
    fn process_commands_then_reads_back() {
        let mut worker =
            FollowerControlWorker::new(Box::new(SimMotorBus::new("follower")), &[1], true, false);
        let result = worker
            .process(Payload::Position(vec![3071, 2052, 2051, 3071, 1023, 3168]))
            .unwrap();
        let Payload::PositionWithForce { pos, force } = result else {
            panic!("wrong payload kind");
        };
        // The sim bus tracks instantly, so the read-back equals the command.
        assert_eq!(pos, vec![3071, 2052, 2051, 3071, 1023, 3168]);
        assert_eq!(force.len(), 6);
    }

    #[test]
    fn output_kinds_order_webcams_then_sim_then_mirror() {
        let kinds = FollowerControlWorker::output_kinds(&[1, 2], true, true);
        assert_eq!(
            kinds,
            vec![
                ChannelKind::WebcamCapture(1),
                ChannelKind::WebcamCapture(2),
                ChannelKind::SimStep,
                ChannelKind::MirrorKinematics,
            ]
        );
        assert_eq!(
            FollowerControlWorker::output_kinds(&[], false, false),
            Vec::new()
        );
    }

    #[test]
    fn fan_out_sends_divergent_payloads_with_shared_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let camera_ids = [1u8];
        let kinds = FollowerControlWorker::output_kinds(&camera_ids, true, true);

        // One reader thread per downstream channel, each reporting what
        // arrived.
        let readers: Vec<_> = kinds
            .iter()
            .map(|&kind| {
                let dir = dir.path().to_path_buf();
                thread::spawn(move || {
                    let mut rx = FifoChannel::new(&dir, kind).unwrap();
                    rx.open_read().unwrap();
                    let mut got = Vec::new();
                    while let Some(envelope) = rx.poll_latest().unwrap() {
                        got.push(envelope);
                    }
                    (kind, got)
                })
            })
            .collect();

        let mut outputs: Vec<FifoChannel> = kinds
            .iter()
            .map(|&kind| {
                let mut ch = FifoChannel::new(dir.path(), kind).unwrap();
                ch.open_write().unwrap();
                ch
            })
            .collect();

        let mut worker =
            FollowerControlWorker::new(Box::new(SimMotorBus::new("follower")), &camera_ids, true, true);
        let deadline = Utc::now();
        let result = Payload::PositionWithForce {
            pos: vec![2047 + 651, 2047, 2047, 2047, 2047, 2047],
            force: vec![0; 6],
        };
        worker
            .publish_outputs(&mut outputs, &result, deadline, 9)
            .unwrap();
        drop(outputs);

        for reader in readers {
            let (kind, got) = reader.join().unwrap();
            assert_eq!(got.len(), 1, "{kind} must receive exactly one envelope");
            let envelope = &got[0];
            assert_eq!(envelope.deadline, deadline);
            assert_eq!(envelope.step, 9);
            match kind {
                ChannelKind::WebcamCapture(_) => {
                    assert_eq!(envelope.msg_type(), MsgType::Empty)
                }
                ChannelKind::SimStep => {
                    let Payload::Position(pos) = &envelope.payload else {
                        panic!("sim channel must carry raw positions");
                    };
                    assert_eq!(pos[0], 2047 + 651);
                }
                ChannelKind::MirrorKinematics => {
                    let Payload::JointAngles(qpos) = &envelope.payload else {
                        panic!("mirror channel must carry joint angles");
                    };
                    // Joint 0 is reversed and offset by ~1 rad worth of steps.
                    assert!(qpos[0] < -0.9 && qpos[0] > -1.1, "got {}", qpos[0]);
                }
                other => panic!("unexpected channel {other}"),
            }
        }
    }

    #[test]
    fn publish_data_logs_qpos_and_force() {
        let sink = RecordingSink::new();
        let mut handle = sink.clone();
        let mut worker =
            FollowerControlWorker::new(Box::new(SimMotorBus::new("follower")), &[], false, false);
        worker.publish_data(
            &mut handle,
            2,
            &Payload::PositionWithForce {
                pos: vec![2047; 6],
                force: vec![10; 6],
            },
        );

        let seen = sink.snapshot();
        assert_eq!(seen.scalars.len(), 12);
        assert!(seen
            .scalars
            .iter()
            .any(|(path, _, value)| path == "/follower/control_force/shoulder_pan" && *value == 10.0));
    }
}
