//! [`Cron`] – the fixed-rate tick source.
//!
//! The scheduler is the only worker with no input channel and the only
//! owner of wall-clock timing. Every other worker is reactive; the
//! deadline and step it stamps on each tick are what the rest of the
//! topology forwards unchanged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::info;

use teleop_bus::FifoChannel;
use teleop_types::{Envelope, Payload, TeleopError};

use crate::telemetry::TelemetrySink;

/// Telemetry name of the scheduler.
pub const WORKER_CRON: &str = "cron";

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct CronConfig {
    /// Target tick rate in Hz; the period is `1 / fps`, fixed.
    pub fps: u32,
    /// Recording session announced downstream before tick 0.
    pub session_id: String,
    /// Stop (with a poison pill) after this many ticks. `None` runs until
    /// the shutdown flag is raised.
    pub max_steps: Option<u64>,
}

/// The pipeline's tick source.
pub struct Cron {
    output: FifoChannel,
    sink: Box<dyn TelemetrySink>,
    period: Duration,
    session_id: String,
    max_steps: Option<u64>,
    shutdown: Arc<AtomicBool>,
    sleeper: Box<dyn FnMut(Duration) + Send>,
}

impl Cron {
    /// Build a scheduler that paces itself with `thread::sleep`.
    ///
    /// Raising `shutdown` (typically from a Ctrl-C handler) makes the
    /// next tick emit one poison pill instead of a tick and exit.
    pub fn new(
        output: FifoChannel,
        sink: Box<dyn TelemetrySink>,
        config: CronConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self::with_sleeper(
            output,
            sink,
            config,
            shutdown,
            Box::new(|remaining| std::thread::sleep(remaining)),
        )
    }

    /// Build a scheduler with an injected pacing function. Tests stub the
    /// sleep out to run simulated time at full speed.
    pub fn with_sleeper(
        output: FifoChannel,
        sink: Box<dyn TelemetrySink>,
        config: CronConfig,
        shutdown: Arc<AtomicBool>,
        sleeper: Box<dyn FnMut(Duration) + Send>,
    ) -> Self {
        let fps = config.fps.max(1);
        Self {
            output,
            sink,
            period: Duration::from_secs_f64(1.0 / f64::from(fps)),
            session_id: config.session_id,
            max_steps: config.max_steps,
            shutdown,
            sleeper,
        }
    }

    /// Run the scheduler to completion. Teardown (closing the output
    /// channel) runs on every exit path.
    pub fn run(mut self) -> Result<(), TeleopError> {
        let outcome = self.setup().and_then(|()| self.tick_loop());
        self.output.close();
        info!(worker = WORKER_CRON, "scheduler stopped");
        outcome
    }

    /// Open the output and announce the session before the first tick, so
    /// every downstream worker rotates its telemetry before seeing
    /// cycle 0.
    fn setup(&mut self) -> Result<(), TeleopError> {
        self.output.open_write()?;
        self.sink.start_session(&self.session_id);
        self.output.send_session_start(&self.session_id)
    }

    fn tick_loop(&mut self) -> Result<(), TeleopError> {
        info!(
            worker = WORKER_CRON,
            period_ms = self.period.as_secs_f64() * 1e3,
            session_id = %self.session_id,
            "scheduler started"
        );
        let period_chrono = chrono::Duration::microseconds(self.period.as_micros() as i64);

        let mut step: u64 = 0;
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!(worker = WORKER_CRON, step, "shutdown requested; sending poison pill");
                return self.output.send_poison_pill();
            }
            if self.max_steps.is_some_and(|max| step >= max) {
                info!(worker = WORKER_CRON, step, "tick budget reached; sending poison pill");
                return self.output.send_poison_pill();
            }

            let tick_start = Instant::now();
            let deadline = Utc::now() + period_chrono;

            self.output
                .write(&Envelope::new(Payload::Empty, deadline, step))?;

            let latency_ms = tick_start.elapsed().as_secs_f64() * 1e3;
            self.sink.log_latency(step, WORKER_CRON, latency_ms);

            // Sleep only the remainder of the period. A tick that ran long
            // proceeds immediately; missed ticks are never queued up.
            let elapsed = tick_start.elapsed();
            if elapsed < self.period {
                (self.sleeper)(self.period - elapsed);
            }

            step += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RecordingSink;
    use std::thread;
    use teleop_bus::ChannelKind;
    use teleop_types::MsgType;

    fn channel(dir: &std::path::Path) -> FifoChannel {
        FifoChannel::new(dir, ChannelKind::LeaderRead).expect("channel")
    }

    fn run_cron(
        dir: &std::path::Path,
        config: CronConfig,
        shutdown: Arc<AtomicBool>,
    ) -> thread::JoinHandle<Result<(), TeleopError>> {
        let output = channel(dir);
        thread::spawn(move || {
            let cron = Cron::with_sleeper(
                output,
                Box::new(RecordingSink::new()),
                config,
                shutdown,
                Box::new(|_| {}), // simulated time: no wall-clock pacing
            );
            cron.run()
        })
    }

    #[test]
    fn session_start_arrives_before_the_first_tick() {
        let dir = tempfile::tempdir().unwrap();
        let runner = run_cron(
            dir.path(),
            CronConfig {
                fps: 30,
                session_id: "rec-0".to_string(),
                max_steps: Some(3),
            },
            Arc::new(AtomicBool::new(false)),
        );

        let mut rx = channel(dir.path());
        rx.open_read().unwrap();
        let first = rx.poll_latest().unwrap().unwrap();
        assert!(
            matches!(first.payload, Payload::SessionStart(ref id) if id == "rec-0"),
            "first envelope must announce the session, got {:?}",
            first.msg_type()
        );
        while rx.poll_latest().unwrap().is_some() {}
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn hundred_seconds_of_simulated_time_reach_the_final_step() {
        let dir = tempfile::tempdir().unwrap();
        // 30 Hz for 100 simulated seconds = 3000 ticks, sleep stubbed out.
        let runner = run_cron(
            dir.path(),
            CronConfig {
                fps: 30,
                session_id: "rec-1".to_string(),
                max_steps: Some(3000),
            },
            Arc::new(AtomicBool::new(false)),
        );

        let mut rx = channel(dir.path());
        rx.open_read().unwrap();
        let mut last_step = None;
        let mut last_deadline = None;
        let mut data_count: u64 = 0;
        while let Some(envelope) = rx.poll_latest().unwrap() {
            if envelope.payload.is_control() {
                continue;
            }
            // Steps and deadlines are monotonic under latest-wins drops.
            if let Some(prev) = last_step {
                assert!(envelope.step > prev);
            }
            if let Some(prev) = last_deadline {
                assert!(envelope.deadline >= prev);
            }
            last_step = Some(envelope.step);
            last_deadline = Some(envelope.deadline);
            data_count += 1;
        }

        // The consumer may have dropped intermediate ticks, but the final
        // cycle must be observed.
        assert_eq!(last_step, Some(2999));
        assert!(data_count <= 3000);
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn shutdown_flag_produces_one_poison_pill_and_no_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let shutdown = Arc::new(AtomicBool::new(true));
        let runner = run_cron(
            dir.path(),
            CronConfig {
                fps: 30,
                session_id: "rec-2".to_string(),
                max_steps: None,
            },
            shutdown,
        );

        let mut rx = channel(dir.path());
        rx.open_read().unwrap();
        let mut kinds = Vec::new();
        while let Some(envelope) = rx.poll_latest().unwrap() {
            kinds.push(envelope.msg_type());
        }
        assert_eq!(kinds, vec![MsgType::SessionStart, MsgType::PoisonPill]);
        runner.join().unwrap().unwrap();
    }
}
