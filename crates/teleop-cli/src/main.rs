//! `teleop-cli` – one binary, one subcommand per worker process.
//!
//! The pipeline runs as independent OS processes connected by named
//! pipes and shared frame buffers; this binary is where the topology is
//! assembled and nowhere else. Each subcommand builds its worker's
//! channels from the shared work directory (`TELEOP_WORK_DIR`, default
//! `/tmp/teleop`), wires the hardware seams to the simulated HAL
//! drivers, and runs the worker to completion.
//!
//! A typical 30 Hz session across terminals:
//!
//! ```text
//! teleop sim-step &
//! teleop webcam-capture --camera-id 1 --detect &
//! teleop detect-objects --camera-id 1 &
//! teleop follower-control --camera-id 1 --sim &
//! teleop leader-read &
//! teleop cron --fps 30
//! ```
//!
//! Ctrl-C on the `cron` process injects one poison pill at the root of
//! the DAG; every downstream worker forwards it and exits.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use teleop_bus::{fifo_dir, frame_buffer_name, shm_dir, ChannelKind, FifoChannel, SharedFrameBuffer};
use teleop_hal::stubs::{
    HeadlessMirrorRig, HeadlessSimulator, SimCamera, SimMotorBus, StubDetector,
};
use teleop_runtime::workers::{
    DetectObjectsWorker, DetectionTask, FollowerControlWorker, LeaderReadWorker,
    MirrorKinematicsWorker, SimStepWorker, WebcamCaptureWorker,
};
use teleop_runtime::{Cron, CronConfig, TracingSink, WorkerHarness};
use teleop_types::TeleopError;

#[derive(Debug, Parser)]
#[command(name = "teleop")]
#[command(about = "Fixed-rate robot teleoperation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler: the tick source and root of the pipeline.
    Cron {
        /// Recording session id; generated when omitted.
        #[arg(long)]
        session_id: Option<String>,
        /// Target cycle rate in Hz.
        #[arg(long, default_value_t = 30)]
        fps: u32,
        /// Stop after this many ticks (default: run until Ctrl-C).
        #[arg(long)]
        max_steps: Option<u64>,
    },
    /// Sample the leader arm once per tick.
    LeaderRead {
        /// Serial port of the leader arm (informational; the simulated
        /// bus stands in for the external driver).
        #[arg(long, default_value = "/dev/ttyACM0")]
        port: String,
    },
    /// Drive the follower arm and fan the cycle out.
    FollowerControl {
        /// Serial port of the follower arm.
        #[arg(long, default_value = "/dev/ttyACM1")]
        port: String,
        /// Camera id to trigger (repeatable).
        #[arg(long = "camera-id")]
        camera_ids: Vec<u8>,
        /// Also feed the simulation-step channel.
        #[arg(long)]
        sim: bool,
        /// Also feed the mirror-kinematics channel.
        #[arg(long)]
        mirror: bool,
    },
    /// Step the physics simulation with the follower's positions.
    SimStep {
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
        /// Skip rendering; publish joint state only.
        #[arg(long)]
        no_render: bool,
    },
    /// Capture webcam frames on the follower's trigger.
    WebcamCapture {
        #[arg(long)]
        camera_id: u8,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
        /// Feed captured frames to a detection worker through shared
        /// memory.
        #[arg(long)]
        detect: bool,
    },
    /// Run object detection on frames from a camera's shared buffer.
    DetectObjects {
        #[arg(long)]
        camera_id: u8,
        /// `detect` (bounding boxes) or `pose` (keypoints).
        #[arg(long, default_value = "detect")]
        task: DetectionTask,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
    },
    /// Mirror the arm's pose onto a second robot via FK + IK.
    MirrorKinematics {
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
    },
    /// Drain a stuck pipe and report how many bytes were flushed.
    Drain {
        /// Channel name, e.g. `leader_read` or `webcam_capture1`.
        #[arg(long)]
        channel: String,
    },
}

fn main() -> ExitCode {
    let _guard = teleop_runtime::init_tracing("teleop");
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), TeleopError> {
    let fifos = fifo_dir();
    match command {
        Command::Cron {
            session_id,
            fps,
            max_steps,
        } => {
            let session_id =
                session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            println!(
                "  {} session {} at {} Hz",
                "cron".bold().cyan(),
                session_id.bold(),
                fps
            );

            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = shutdown.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                println!();
                println!("{}", "  Ctrl-C received; shutting the pipeline down…".yellow());
                flag.store(true, Ordering::SeqCst);
            }) {
                warn!(error = %e, "failed to install Ctrl-C handler");
            }

            let output = FifoChannel::new(&fifos, ChannelKind::LeaderRead)?;
            let cron = Cron::new(
                output,
                Box::new(TracingSink::default()),
                CronConfig {
                    fps,
                    session_id,
                    max_steps,
                },
                shutdown,
            );
            cron.run()?;
            println!("  {} pipeline shut down cleanly", "✓".green());
            Ok(())
        }

        Command::LeaderRead { port } => {
            info!(port, "using simulated leader bus");
            let worker = LeaderReadWorker::new(Box::new(SimMotorBus::new("leader")));
            WorkerHarness::new(
                worker,
                FifoChannel::new(&fifos, ChannelKind::LeaderRead)?,
                vec![FifoChannel::new(&fifos, ChannelKind::FollowerControl)?],
                Box::new(TracingSink::default()),
            )
            .run()
        }

        Command::FollowerControl {
            port,
            camera_ids,
            sim,
            mirror,
        } => {
            info!(port, "using simulated follower bus");
            let worker = FollowerControlWorker::new(
                Box::new(SimMotorBus::new("follower")),
                &camera_ids,
                sim,
                mirror,
            );
            let outputs = FollowerControlWorker::output_kinds(&camera_ids, sim, mirror)
                .into_iter()
                .map(|kind| FifoChannel::new(&fifos, kind))
                .collect::<Result<Vec<_>, _>>()?;
            WorkerHarness::new(
                worker,
                FifoChannel::new(&fifos, ChannelKind::FollowerControl)?,
                outputs,
                Box::new(TracingSink::default()),
            )
            .run()
        }

        Command::SimStep {
            width,
            height,
            no_render,
        } => {
            let render = !no_render;
            let worker = SimStepWorker::new(
                Box::new(HeadlessSimulator::new(width, height, render)),
                render,
            );
            WorkerHarness::new(
                worker,
                FifoChannel::new(&fifos, ChannelKind::SimStep)?,
                Vec::new(),
                Box::new(TracingSink::default()),
            )
            .run()
        }

        Command::WebcamCapture {
            camera_id,
            width,
            height,
            detect,
        } => {
            let camera = SimCamera::new(format!("webcam{camera_id}"), width, height);
            let (frame_buffer, outputs) = if detect {
                let buffer = SharedFrameBuffer::create(
                    &shm_dir(),
                    &frame_buffer_name(camera_id),
                    width,
                    height,
                )?;
                let detect_channel =
                    FifoChannel::new(&fifos, ChannelKind::DetectObjects(camera_id))?;
                (Some(buffer), vec![detect_channel])
            } else {
                (None, Vec::new())
            };
            let worker = WebcamCaptureWorker::new(camera_id, Box::new(camera), frame_buffer);
            WorkerHarness::new(
                worker,
                FifoChannel::new(&fifos, ChannelKind::WebcamCapture(camera_id))?,
                outputs,
                Box::new(TracingSink::default()),
            )
            .run()
        }

        Command::DetectObjects {
            camera_id,
            task,
            width,
            height,
        } => {
            let detector = match task {
                DetectionTask::Detect => StubDetector::boxes(),
                DetectionTask::Pose => StubDetector::pose(),
            };
            let worker = DetectObjectsWorker::new(
                camera_id,
                Box::new(detector),
                shm_dir(),
                width,
                height,
            );
            WorkerHarness::new(
                worker,
                FifoChannel::new(&fifos, ChannelKind::DetectObjects(camera_id))?,
                Vec::new(),
                Box::new(TracingSink::default()),
            )
            .run()
        }

        Command::MirrorKinematics { width, height } => {
            let worker =
                MirrorKinematicsWorker::new(Box::new(HeadlessMirrorRig::new(width, height)));
            WorkerHarness::new(
                worker,
                FifoChannel::new(&fifos, ChannelKind::MirrorKinematics)?,
                Vec::new(),
                Box::new(TracingSink::default()),
            )
            .run()
        }

        Command::Drain { channel } => {
            let path = fifos.join(format!("{channel}.fifo"));
            let drained = drain_fifo(&path)?;
            println!(
                "  {} drained {} bytes from {}",
                "✓".green(),
                drained.to_string().bold(),
                path.display()
            );
            Ok(())
        }
    }
}

/// Flush whatever is sitting in a pipe without blocking on an absent
/// writer. Useful when a crashed consumer left a producer wedged on a
/// full pipe buffer.
fn drain_fifo(path: &PathBuf) -> Result<u64, TeleopError> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut fifo = std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(nix::libc::O_NONBLOCK)
        .open(path)
        .map_err(|e| TeleopError::ChannelUnavailable {
            name: path.display().to_string(),
            reason: format!("open: {e}"),
        })?;

    let mut total: u64 = 0;
    let mut chunk = [0u8; 8192];
    loop {
        match fifo.read(&mut chunk) {
            // No writers left: the pipe is fully drained.
            Ok(0) => break,
            Ok(n) => total += n as u64,
            // A writer exists but has nothing buffered right now.
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TeleopError::Io(e)),
        }
    }
    Ok(total)
}
