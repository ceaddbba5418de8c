//! The [`Worker`] contract and the harness that drives it.
//!
//! Every process except the scheduler runs the same loop: poll the input
//! channel for the newest envelope, handle control envelopes, validate,
//! process, propagate with the unchanged deadline and step, publish
//! telemetry. A concrete worker implements [`Worker::process`] (and
//! overrides [`Worker::publish_outputs`] only when its channels need
//! divergent payloads); the [`WorkerHarness`] owns the channels and the
//! telemetry sink and guarantees teardown on every exit path.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use teleop_bus::FifoChannel;
use teleop_types::{Envelope, MsgType, Payload, TeleopError};

use crate::telemetry::TelemetrySink;

/// Domain logic of one worker process.
///
/// Expected input and output kinds are bound at construction time; the
/// harness validates every envelope against them and treats a mismatch
/// as a fatal topology wiring bug.
pub trait Worker {
    /// Telemetry name of this worker instance (e.g. `"follower"`,
    /// `"webcam2"`).
    fn name(&self) -> &str;

    /// The only message kind this worker accepts.
    fn input_type(&self) -> MsgType;

    /// The only message kind [`process`][Self::process] may produce.
    fn output_type(&self) -> MsgType;

    /// Domain-specific resource acquisition. Runs once, after the
    /// channels have opened; a failure here aborts before the loop.
    fn setup(&mut self) -> Result<(), TeleopError> {
        Ok(())
    }

    /// Transform one cycle's payload into this worker's output payload.
    fn process(&mut self, payload: Payload) -> Result<Payload, TeleopError>;

    /// Fan the result out to the output channels.
    ///
    /// The default broadcasts the same envelope to every channel. Workers
    /// whose channels carry different payloads (follower control, webcam
    /// capture with detection) override this; the deadline and step must
    /// be forwarded unchanged either way.
    fn publish_outputs(
        &mut self,
        outputs: &mut [FifoChannel],
        result: &Payload,
        deadline: DateTime<Utc>,
        step: u64,
    ) -> Result<(), TeleopError> {
        for channel in outputs.iter_mut() {
            channel.write(&Envelope::new(result.clone(), deadline, step))?;
        }
        Ok(())
    }

    /// Hand the cycle result to the telemetry sink. Fire-and-forget.
    fn publish_data(&mut self, sink: &mut dyn TelemetrySink, step: u64, result: &Payload) {
        let _ = (sink, step, result);
    }

    /// Domain-specific resource release. Runs after the channels close,
    /// on every exit path.
    fn teardown(&mut self) {}
}

/// Owns a worker's channels and telemetry sink and runs its loop.
pub struct WorkerHarness<W: Worker> {
    worker: W,
    input: FifoChannel,
    outputs: Vec<FifoChannel>,
    sink: Box<dyn TelemetrySink>,
}

impl<W: Worker> WorkerHarness<W> {
    pub fn new(
        worker: W,
        input: FifoChannel,
        outputs: Vec<FifoChannel>,
        sink: Box<dyn TelemetrySink>,
    ) -> Self {
        Self {
            worker,
            input,
            outputs,
            sink,
        }
    }

    /// Run the worker to completion: setup, loop until shutdown or error,
    /// teardown. Teardown runs on every exit path.
    pub fn run(mut self) -> Result<(), TeleopError> {
        info!(
            worker = self.worker.name(),
            pid = std::process::id(),
            outputs = self.outputs.len(),
            "worker starting"
        );
        let outcome = self.setup().and_then(|()| self.run_loop());
        self.teardown();
        match &outcome {
            Ok(()) => info!(worker = self.worker.name(), "worker stopped"),
            Err(e) => error!(worker = self.worker.name(), error = %e, "worker failed"),
        }
        outcome
    }

    fn setup(&mut self) -> Result<(), TeleopError> {
        self.input.open_read()?;
        for channel in &mut self.outputs {
            channel.open_write()?;
        }
        self.worker.setup()
    }

    fn run_loop(&mut self) -> Result<(), TeleopError> {
        loop {
            let Some(envelope) = self.input.poll_latest()? else {
                // An upstream crash manifests here as silence followed by
                // EOF once the writer's handle drops; there is nothing to
                // forward, so just stop.
                warn!(
                    worker = self.worker.name(),
                    "input channel closed without a poison pill; stopping"
                );
                return Ok(());
            };

            let start = Instant::now();

            match envelope.payload {
                Payload::PoisonPill => {
                    info!(
                        worker = self.worker.name(),
                        "poison pill received; propagating shutdown"
                    );
                    for channel in &mut self.outputs {
                        channel.send_poison_pill()?;
                    }
                    return Ok(());
                }
                Payload::SessionStart(session_id) => {
                    self.sink.start_session(&session_id);
                    for channel in &mut self.outputs {
                        channel.send_session_start(&session_id)?;
                    }
                    continue;
                }
                payload => {
                    self.validate(payload.msg_type(), self.worker.input_type())?;

                    let result = self.worker.process(payload)?;
                    self.validate(result.msg_type(), self.worker.output_type())?;

                    let latency_ms = start.elapsed().as_secs_f64() * 1e3;
                    let end = Utc::now();
                    if end > envelope.deadline {
                        // Soft real-time: an overrun is jitter to diagnose,
                        // not a reason to drop the cycle.
                        let overrun_ms = (end - envelope.deadline)
                            .num_microseconds()
                            .map(|us| us as f64 / 1e3)
                            .unwrap_or(f64::MAX);
                        debug!(
                            worker = self.worker.name(),
                            step = envelope.step,
                            overrun_ms,
                            latency_ms,
                            "deadline exceeded"
                        );
                    }

                    self.worker.publish_outputs(
                        &mut self.outputs,
                        &result,
                        envelope.deadline,
                        envelope.step,
                    )?;
                    self.worker
                        .publish_data(self.sink.as_mut(), envelope.step, &result);
                    self.sink
                        .log_latency(envelope.step, self.worker.name(), latency_ms);
                }
            }
        }
    }

    fn validate(&self, actual: MsgType, expected: MsgType) -> Result<(), TeleopError> {
        if actual == expected {
            Ok(())
        } else {
            Err(TeleopError::Validation {
                worker: self.worker.name().to_string(),
                expected,
                actual,
            })
        }
    }

    fn teardown(&mut self) {
        self.input.close();
        for channel in &mut self.outputs {
            channel.close();
        }
        self.worker.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RecordingSink;
    use crate::workers::leader::LeaderReadWorker;
    use chrono::Duration as ChronoDuration;
    use std::thread;
    use std::time::Duration;
    use teleop_bus::ChannelKind;
    use teleop_hal::stubs::SimMotorBus;

    fn channel(dir: &std::path::Path, kind: ChannelKind) -> FifoChannel {
        FifoChannel::new(dir, kind).expect("channel")
    }

    /// Echoes its input after sleeping, to force deadline overruns.
    struct SlowEcho {
        sleep: Duration,
    }

    impl Worker for SlowEcho {
        fn name(&self) -> &str {
            "slow_echo"
        }
        fn input_type(&self) -> MsgType {
            MsgType::Position
        }
        fn output_type(&self) -> MsgType {
            MsgType::Position
        }
        fn process(&mut self, payload: Payload) -> Result<Payload, TeleopError> {
            thread::sleep(self.sleep);
            Ok(payload)
        }
    }

    #[test]
    fn harness_forwards_deadline_and_step_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let in_dir = dir.path().to_path_buf();

        let deadline = Utc::now() + ChronoDuration::milliseconds(33);
        let feeder = thread::spawn(move || {
            let mut tx = channel(&in_dir, ChannelKind::LeaderRead);
            tx.open_write().unwrap();
            for step in 0..4 {
                tx.write(&Envelope::new(Payload::Empty, deadline, step))
                    .unwrap();
            }
            tx.send_poison_pill().unwrap();
        });

        let worker = LeaderReadWorker::new(Box::new(SimMotorBus::new("leader")));
        let harness = WorkerHarness::new(
            worker,
            channel(dir.path(), ChannelKind::LeaderRead),
            vec![channel(dir.path(), ChannelKind::FollowerControl)],
            Box::new(RecordingSink::new()),
        );
        let runner = thread::spawn(move || harness.run());

        let mut rx = channel(dir.path(), ChannelKind::FollowerControl);
        rx.open_read().unwrap();
        let mut saw_pill = false;
        let mut last = None;
        while let Some(envelope) = rx.poll_latest().unwrap() {
            if matches!(envelope.payload, Payload::PoisonPill) {
                saw_pill = true;
            } else {
                assert_eq!(envelope.deadline, deadline, "deadline must propagate unchanged");
                assert!(envelope.step < 4);
                assert!(matches!(envelope.payload, Payload::Position(_)));
            }
            last = Some(envelope);
        }

        assert!(saw_pill, "shutdown must cascade through the worker");
        assert!(last.is_some());
        feeder.join().unwrap();
        runner.join().unwrap().expect("worker exits cleanly");
    }

    /// End-to-end over a depth-3 topology: scheduler → leader → follower
    /// → leaf channel. One poison pill injected at the root must reach
    /// the leaf, and every data envelope on the way keeps the scheduler's
    /// step ordering.
    #[test]
    fn poison_pill_cascades_through_a_worker_chain() {
        use crate::scheduler::{Cron, CronConfig};
        use crate::workers::follower::FollowerControlWorker;
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();

        let cron_out = channel(dir.path(), ChannelKind::LeaderRead);
        let cron = thread::spawn(move || {
            Cron::with_sleeper(
                cron_out,
                Box::new(RecordingSink::new()),
                CronConfig {
                    fps: 30,
                    session_id: "rec-chain".to_string(),
                    max_steps: Some(10),
                },
                Arc::new(AtomicBool::new(false)),
                Box::new(|_| {}),
            )
            .run()
        });

        let leader_in = channel(dir.path(), ChannelKind::LeaderRead);
        let leader_out = channel(dir.path(), ChannelKind::FollowerControl);
        let leader = thread::spawn(move || {
            WorkerHarness::new(
                LeaderReadWorker::new(Box::new(SimMotorBus::new("leader"))),
                leader_in,
                vec![leader_out],
                Box::new(RecordingSink::new()),
            )
            .run()
        });

        let follower_in = channel(dir.path(), ChannelKind::FollowerControl);
        let follower_out = channel(dir.path(), ChannelKind::SimStep);
        let follower = thread::spawn(move || {
            WorkerHarness::new(
                FollowerControlWorker::new(
                    Box::new(SimMotorBus::new("follower")),
                    &[],
                    true,
                    false,
                ),
                follower_in,
                vec![follower_out],
                Box::new(RecordingSink::new()),
            )
            .run()
        });

        let mut leaf = channel(dir.path(), ChannelKind::SimStep);
        leaf.open_read().unwrap();
        let mut saw_session = false;
        let mut saw_pill = false;
        let mut last_step = None;
        while let Some(envelope) = leaf.poll_latest().unwrap() {
            match envelope.payload {
                Payload::SessionStart(ref id) => {
                    assert_eq!(id, "rec-chain");
                    saw_session = true;
                }
                Payload::PoisonPill => saw_pill = true,
                Payload::Position(_) => {
                    if let Some(prev) = last_step {
                        assert!(envelope.step > prev, "steps must stay ordered");
                    }
                    assert!(envelope.step < 10);
                    last_step = Some(envelope.step);
                }
                ref other => panic!("unexpected payload at the leaf: {other:?}"),
            }
        }

        assert!(saw_session, "session start must reach the leaf");
        assert!(saw_pill, "one pill at the root must shut down the whole DAG");
        cron.join().unwrap().unwrap();
        leader.join().unwrap().unwrap();
        follower.join().unwrap().unwrap();
    }

    #[test]
    fn input_type_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let in_dir = dir.path().to_path_buf();

        let feeder = thread::spawn(move || {
            let mut tx = channel(&in_dir, ChannelKind::LeaderRead);
            tx.open_write().unwrap();
            // The leader expects Empty ticks, not joint angles.
            tx.write(&Envelope::new(
                Payload::JointAngles(vec![0.0; 6]),
                Utc::now(),
                0,
            ))
            .unwrap();
        });

        let worker = LeaderReadWorker::new(Box::new(SimMotorBus::new("leader")));
        let harness = WorkerHarness::new(
            worker,
            channel(dir.path(), ChannelKind::LeaderRead),
            Vec::new(),
            Box::new(RecordingSink::new()),
        );
        let outcome = harness.run();
        assert!(matches!(outcome, Err(TeleopError::Validation { .. })));
        feeder.join().unwrap();
    }

    #[test]
    fn session_start_rotates_the_sink_and_forwards() {
        let dir = tempfile::tempdir().unwrap();
        let in_dir = dir.path().to_path_buf();

        let feeder = thread::spawn(move || {
            let mut tx = channel(&in_dir, ChannelKind::LeaderRead);
            tx.open_write().unwrap();
            tx.send_session_start("rec-42").unwrap();
            tx.write(&Envelope::new(Payload::Empty, Utc::now(), 0)).unwrap();
            tx.send_poison_pill().unwrap();
        });

        let sink = RecordingSink::new();
        let worker = LeaderReadWorker::new(Box::new(SimMotorBus::new("leader")));
        let harness = WorkerHarness::new(
            worker,
            channel(dir.path(), ChannelKind::LeaderRead),
            vec![channel(dir.path(), ChannelKind::FollowerControl)],
            Box::new(sink.clone()),
        );
        let runner = thread::spawn(move || harness.run());

        let mut rx = channel(dir.path(), ChannelKind::FollowerControl);
        rx.open_read().unwrap();
        let mut kinds = Vec::new();
        while let Some(envelope) = rx.poll_latest().unwrap() {
            kinds.push(envelope.msg_type());
        }

        assert_eq!(kinds.first(), Some(&MsgType::SessionStart));
        assert!(kinds.contains(&MsgType::PoisonPill));
        feeder.join().unwrap();
        runner.join().unwrap().unwrap();

        let seen = sink.snapshot();
        assert_eq!(seen.sessions, vec!["rec-42".to_string()]);
        // The data cycle logged a latency sample tagged with its step.
        assert!(seen.latencies.iter().any(|(w, step, _)| w == "leader" && *step == 0));
    }

    #[test]
    fn deadline_overrun_is_logged_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let in_dir = dir.path().to_path_buf();

        let feeder = thread::spawn(move || {
            let mut tx = channel(&in_dir, ChannelKind::SimStep);
            tx.open_write().unwrap();
            // Deadline already in the past: the worker cannot make it.
            let stale_deadline = Utc::now() - ChronoDuration::milliseconds(5);
            tx.write(&Envelope::new(
                Payload::Position(vec![1, 2, 3]),
                stale_deadline,
                7,
            ))
            .unwrap();
            tx.send_poison_pill().unwrap();
        });

        let harness = WorkerHarness::new(
            SlowEcho {
                sleep: Duration::from_millis(20),
            },
            channel(dir.path(), ChannelKind::SimStep),
            vec![channel(dir.path(), ChannelKind::MirrorKinematics)],
            Box::new(RecordingSink::new()),
        );
        let runner = thread::spawn(move || harness.run());

        let mut rx = channel(dir.path(), ChannelKind::MirrorKinematics);
        rx.open_read().unwrap();
        let mut got_late_output = false;
        while let Some(envelope) = rx.poll_latest().unwrap() {
            if let Payload::Position(pos) = &envelope.payload {
                assert_eq!(pos, &vec![1, 2, 3]);
                assert_eq!(envelope.step, 7);
                got_late_output = true;
            }
        }
        assert!(
            got_late_output,
            "a late cycle must still be published downstream"
        );
        feeder.join().unwrap();
        runner.join().unwrap().unwrap();
    }
}
