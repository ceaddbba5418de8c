//! `teleop-hal` – trait seams for every external collaborator.
//!
//! The pipeline core transports data; it never interprets a motor
//! position, steps a physics engine, or runs a detection model itself.
//! Each of those lives behind a small trait so drivers can be swapped
//! without touching the bus or the worker runtime:
//!
//! - [`MotorBus`] – a position-controlled servo chain (leader or follower
//!   arm), speaking opaque integer encoder steps.
//! - [`Simulator`] – a physics/rendering engine exposing one `step`.
//! - [`MirrorRig`] – a kinematics rig that mirrors one arm's pose onto
//!   another robot via forward + inverse kinematics.
//! - [`Camera`] – an image-capture device.
//! - [`Detector`] – an object-detection model.
//!
//! [`JointCalibration`] converts between encoder steps and radians, and
//! [`stubs`] provides simulated drivers for every trait so the full
//! topology runs headless in CI without hardware.

pub mod calibration;
pub mod camera;
pub mod detector;
pub mod motor;
pub mod sim;
pub mod stubs;

pub use calibration::JointCalibration;
pub use camera::Camera;
pub use detector::{Detection, DetectionShape, Detector};
pub use motor::MotorBus;
pub use sim::{MirrorRig, MirrorStepOutput, SimStepOutput, Simulator};
