//! `teleop-runtime` – the worker execution engine.
//!
//! Every pipeline process is one of two things:
//!
//! - a [`WorkerHarness`] wrapping a [`Worker`] implementation — the
//!   uniform receive → process → propagate → telemetry loop that every
//!   domain worker rides on, or
//! - the [`Cron`] scheduler — the unique input-less worker that owns
//!   wall-clock timing and originates every cycle's deadline and step.
//!
//! # Modules
//!
//! - [`worker`] – the [`Worker`] trait and the harness that drives it.
//! - [`scheduler`] – [`Cron`], the fixed-rate tick source.
//! - [`telemetry`] – the [`TelemetrySink`] boundary plus the global
//!   `tracing`/OTLP pipeline initialisation.
//! - [`workers`] – the concrete worker variants (leader read, follower
//!   control, sim step, webcam capture, object detection, mirror
//!   kinematics), each a thin `process()` over a HAL trait.

pub mod scheduler;
pub mod telemetry;
pub mod worker;
pub mod workers;

pub use scheduler::{Cron, CronConfig};
pub use telemetry::{
    init_tracing, log_joint_vector, NullSink, RecordingSink, TelemetrySink, TracerProviderGuard,
    TracingSink,
};
pub use worker::{Worker, WorkerHarness};
