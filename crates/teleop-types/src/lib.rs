use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Joint labels for the six-axis arm, in bus order.
///
/// Telemetry paths are built per joint (`/follower/qpos/elbow_flex`), so
/// every worker that logs a joint vector indexes into this table.
pub const JOINT_NAMES: [&str; 6] = [
    "shoulder_pan",
    "shoulder_lift",
    "elbow_flex",
    "wrist_flex",
    "wrist_roll",
    "gripper",
];

/// A raw image as carried on the bus and through the shared frame buffer:
/// row-major pixel rows, 3 bytes per pixel in the observed use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row-major pixel data.
    pub data: Vec<u8>,
}

impl ImageFrame {
    /// Expected byte length of a frame with the given channel count.
    pub fn expected_len(&self, channels: u32) -> usize {
        (self.width as usize) * (self.height as usize) * (channels as usize)
    }

    /// `true` when `data` holds exactly `width * height * channels` bytes.
    pub fn is_packed(&self, channels: u32) -> bool {
        self.data.len() == self.expected_len(channels)
    }
}

/// The simulator's rendered output planes for one step. Planes the
/// simulator was not configured to render are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RenderSet {
    pub color: Option<ImageFrame>,
    pub depth: Option<ImageFrame>,
    pub segmentation: Option<ImageFrame>,
    pub normal: Option<ImageFrame>,
}

/// Discriminant of every message kind carried on a channel.
///
/// Each worker is bound at construction to the input and output kind it
/// accepts and produces; the runtime validates envelopes against that
/// binding and fails fast on topology wiring bugs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgType {
    /// Bare tick / trigger with no payload.
    Empty,
    /// Motor positions in encoder steps.
    Position,
    /// Motor positions plus per-joint control force, both in device units.
    PositionWithForce,
    /// Joint angles in radians.
    JointAngles,
    /// Joint angles plus per-joint control force.
    JointAnglesWithForce,
    /// Simulated joint angles, control force, and rendered planes.
    JointAnglesRenderWithForce,
    /// Joint angles of two rigs plus one rendered view.
    DualJointAnglesWithImage,
    /// A captured camera frame.
    RawImage,
    /// Trigger telling a detection worker a fresh frame is in shared memory.
    ObjectDetectionSignal,
    /// Control: orderly cascading shutdown.
    PoisonPill,
    /// Control: rotate telemetry to a new recording session.
    SessionStart,
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MsgType::Empty => "empty",
            MsgType::Position => "position",
            MsgType::PositionWithForce => "position_with_force",
            MsgType::JointAngles => "joint_angles",
            MsgType::JointAnglesWithForce => "joint_angles_with_force",
            MsgType::JointAnglesRenderWithForce => "joint_angles_render_with_force",
            MsgType::DualJointAnglesWithImage => "dual_joint_angles_with_image",
            MsgType::RawImage => "raw_image",
            MsgType::ObjectDetectionSignal => "object_detection_signal",
            MsgType::PoisonPill => "poison_pill",
            MsgType::SessionStart => "session_start",
        };
        f.write_str(name)
    }
}

/// Variant-per-kind payload union. The shape of each case is fixed by its
/// [`MsgType`]; there is no runtime tuple-shape convention to get wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Empty,
    Position(Vec<i32>),
    PositionWithForce { pos: Vec<i32>, force: Vec<i32> },
    JointAngles(Vec<f32>),
    JointAnglesWithForce { qpos: Vec<f32>, force: Vec<f32> },
    JointAnglesRenderWithForce {
        qpos: Vec<f32>,
        force: Vec<f32>,
        render: RenderSet,
    },
    DualJointAnglesWithImage {
        primary_qpos: Vec<f32>,
        mirrored_qpos: Vec<f32>,
        image: ImageFrame,
    },
    RawImage(ImageFrame),
    ObjectDetectionSignal,
    PoisonPill,
    SessionStart(String),
}

impl Payload {
    /// The discriminant of this payload.
    pub fn msg_type(&self) -> MsgType {
        match self {
            Payload::Empty => MsgType::Empty,
            Payload::Position(_) => MsgType::Position,
            Payload::PositionWithForce { .. } => MsgType::PositionWithForce,
            Payload::JointAngles(_) => MsgType::JointAngles,
            Payload::JointAnglesWithForce { .. } => MsgType::JointAnglesWithForce,
            Payload::JointAnglesRenderWithForce { .. } => MsgType::JointAnglesRenderWithForce,
            Payload::DualJointAnglesWithImage { .. } => MsgType::DualJointAnglesWithImage,
            Payload::RawImage(_) => MsgType::RawImage,
            Payload::ObjectDetectionSignal => MsgType::ObjectDetectionSignal,
            Payload::PoisonPill => MsgType::PoisonPill,
            Payload::SessionStart(_) => MsgType::SessionStart,
        }
    }

    /// Control payloads bypass latest-wins consumption and carry no cycle
    /// semantics (their deadline and step fields are meaningless).
    pub fn is_control(&self) -> bool {
        matches!(self, Payload::PoisonPill | Payload::SessionStart(_))
    }
}

/// The unit of transfer on every channel.
///
/// `deadline` and `step` are assigned once per cycle by the scheduler and
/// forwarded unchanged by every worker: the deadline never shrinks or
/// grows as it propagates, only the margin remaining does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Wall-clock instant by which the whole downstream chain for this
    /// cycle should finish. Advisory: overruns are logged, never enforced.
    pub deadline: DateTime<Utc>,
    /// Monotonically increasing cycle counter, scheduler-assigned.
    pub step: u64,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(payload: Payload, deadline: DateTime<Utc>, step: u64) -> Self {
        Self {
            deadline,
            step,
            payload,
        }
    }

    /// A control envelope; deadline and step are filler values.
    pub fn control(payload: Payload) -> Self {
        debug_assert!(payload.is_control());
        Self {
            deadline: Utc::now(),
            step: 0,
            payload,
        }
    }

    pub fn msg_type(&self) -> MsgType {
        self.payload.msg_type()
    }
}

/// Error taxonomy of the pipeline.
///
/// Deadline overrun and telemetry failure are deliberately absent: both
/// are logged conditions, never values that abort the control loop.
#[derive(Debug, Error)]
pub enum TeleopError {
    /// A channel could not be created or opened. Fatal to the worker.
    #[error("channel '{name}' unavailable: {reason}")]
    ChannelUnavailable { name: String, reason: String },

    /// An envelope kind did not match the worker's declared binding.
    /// Fatal: this is a topology wiring bug, not a runtime condition.
    #[error("worker '{worker}' expected {expected} but received {actual}")]
    Validation {
        worker: String,
        expected: MsgType,
        actual: MsgType,
    },

    /// A frame did not fit the shared buffer's declared capacity.
    /// Non-fatal: the producer drops the frame and keeps serving ticks.
    #[error("frame needs {required} bytes but the buffer holds {capacity}")]
    FrameTooLarge { required: usize, capacity: usize },

    /// A device driver call failed.
    #[error("hardware fault on {component}: {details}")]
    Hardware { component: String, details: String },

    /// A wire record could not be decoded.
    #[error("codec error on channel '{channel}': {reason}")]
    Codec { channel: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_payload_maps_to_its_discriminant() {
        let frame = ImageFrame {
            width: 2,
            height: 2,
            data: vec![0; 12],
        };
        let cases: Vec<(Payload, MsgType)> = vec![
            (Payload::Empty, MsgType::Empty),
            (Payload::Position(vec![1, 2]), MsgType::Position),
            (
                Payload::PositionWithForce {
                    pos: vec![1],
                    force: vec![0],
                },
                MsgType::PositionWithForce,
            ),
            (Payload::JointAngles(vec![0.5]), MsgType::JointAngles),
            (
                Payload::JointAnglesWithForce {
                    qpos: vec![0.5],
                    force: vec![0.0],
                },
                MsgType::JointAnglesWithForce,
            ),
            (
                Payload::JointAnglesRenderWithForce {
                    qpos: vec![0.5],
                    force: vec![0.0],
                    render: RenderSet::default(),
                },
                MsgType::JointAnglesRenderWithForce,
            ),
            (
                Payload::DualJointAnglesWithImage {
                    primary_qpos: vec![0.1],
                    mirrored_qpos: vec![0.2],
                    image: frame.clone(),
                },
                MsgType::DualJointAnglesWithImage,
            ),
            (Payload::RawImage(frame), MsgType::RawImage),
            (Payload::ObjectDetectionSignal, MsgType::ObjectDetectionSignal),
            (Payload::PoisonPill, MsgType::PoisonPill),
            (
                Payload::SessionStart("rec-1".to_string()),
                MsgType::SessionStart,
            ),
        ];
        for (payload, expected) in cases {
            assert_eq!(payload.msg_type(), expected);
        }
    }

    #[test]
    fn only_pill_and_session_start_are_control() {
        assert!(Payload::PoisonPill.is_control());
        assert!(Payload::SessionStart("rec".into()).is_control());
        assert!(!Payload::Empty.is_control());
        assert!(!Payload::Position(vec![]).is_control());
        assert!(!Payload::ObjectDetectionSignal.is_control());
    }

    #[test]
    fn envelope_roundtrip_with_image_payload() {
        let envelope = Envelope::new(
            Payload::RawImage(ImageFrame {
                width: 2,
                height: 1,
                data: vec![9, 8, 7, 6, 5, 4],
            }),
            Utc::now(),
            42,
        );
        let json = serde_json::to_string(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn envelope_roundtrip_preserves_deadline_and_step() {
        let deadline = Utc::now();
        let envelope = Envelope::new(Payload::Position(vec![2047, 1030, 3083]), deadline, 7);
        let json = serde_json::to_string(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.deadline, deadline);
        assert_eq!(back.step, 7);
        assert_eq!(back.msg_type(), MsgType::Position);
    }

    #[test]
    fn image_frame_packing_check() {
        let frame = ImageFrame {
            width: 4,
            height: 2,
            data: vec![0; 24],
        };
        assert!(frame.is_packed(3));
        assert!(!frame.is_packed(4));
    }

    #[test]
    fn validation_error_names_both_types() {
        let err = TeleopError::Validation {
            worker: "follower".to_string(),
            expected: MsgType::Position,
            actual: MsgType::Empty,
        };
        let text = err.to_string();
        assert!(text.contains("follower"));
        assert!(text.contains("position"));
        assert!(text.contains("empty"));
    }

    #[test]
    fn frame_too_large_reports_sizes() {
        let err = TeleopError::FrameTooLarge {
            required: 1000,
            capacity: 64,
        };
        assert!(err.to_string().contains("1000"));
        assert!(err.to_string().contains("64"));
    }
}
