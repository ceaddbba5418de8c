//! Detect-objects worker: runs detection on frames from shared memory.
//!
//! The worker never receives image bytes on its input channel; the
//! webcam producer parks the frame in the camera's shared buffer and
//! sends a bare `ObjectDetectionSignal`. Detection is best-effort by
//! design — if the frame was already reclaimed, the cycle is a no-op.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, info};

use teleop_bus::{frame_buffer_name, SharedFrameBuffer};
use teleop_hal::{Detection, DetectionShape, Detector};
use teleop_types::{MsgType, Payload, TeleopError};

use crate::telemetry::TelemetrySink;
use crate::worker::Worker;

/// Which model family the detection process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionTask {
    /// Object bounding boxes.
    Detect,
    /// Human pose keypoints.
    Pose,
}

impl FromStr for DetectionTask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detect" => Ok(DetectionTask::Detect),
            "pose" => Ok(DetectionTask::Pose),
            other => Err(format!("unknown detection task '{other}'")),
        }
    }
}

/// Consumes detection signals, reads the newest frame from the camera's
/// shared buffer, and publishes the results to telemetry.
pub struct DetectObjectsWorker {
    name: String,
    camera_id: u8,
    detector: Box<dyn Detector>,
    shm_dir: PathBuf,
    width: u32,
    height: u32,
    buffer: Option<SharedFrameBuffer>,
    last_detections: Option<Vec<Detection>>,
}

impl DetectObjectsWorker {
    /// `width`/`height` size the buffer if this consumer starts before
    /// the producer has created the region.
    pub fn new(
        camera_id: u8,
        detector: Box<dyn Detector>,
        shm_dir: PathBuf,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            name: format!("detect_objects{camera_id}"),
            camera_id,
            detector,
            shm_dir,
            width,
            height,
            buffer: None,
            last_detections: None,
        }
    }
}

impl Worker for DetectObjectsWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_type(&self) -> MsgType {
        MsgType::ObjectDetectionSignal
    }

    fn output_type(&self) -> MsgType {
        MsgType::Empty
    }

    fn setup(&mut self) -> Result<(), TeleopError> {
        let name = frame_buffer_name(self.camera_id);
        // Attach to the producer's region, or create it at the agreed
        // size if this side won the startup race.
        let buffer = match SharedFrameBuffer::attach(&self.shm_dir, &name) {
            Ok(buffer) => buffer,
            Err(_) => SharedFrameBuffer::create(&self.shm_dir, &name, self.width, self.height)?,
        };
        info!(worker = %self.name, region = %name, "frame buffer ready");
        self.buffer = Some(buffer);
        Ok(())
    }

    fn process(&mut self, _payload: Payload) -> Result<Payload, TeleopError> {
        let Some(buffer) = self.buffer.as_mut() else {
            return Err(TeleopError::ChannelUnavailable {
                name: frame_buffer_name(self.camera_id),
                reason: "frame buffer not attached; setup did not run".to_string(),
            });
        };

        match buffer.read_frame() {
            Some(frame) => {
                self.last_detections = Some(self.detector.detect(&frame)?);
            }
            None => {
                debug!(worker = %self.name, "no frame ready; skipping inference");
                self.last_detections = None;
            }
        }
        Ok(Payload::Empty)
    }

    fn publish_data(&mut self, sink: &mut dyn TelemetrySink, step: u64, _result: &Payload) {
        let Some(detections) = self.last_detections.as_ref() else {
            return;
        };
        let video_path = format!("/webcam{}/video", self.camera_id);
        sink.log_scalar(
            &format!("{video_path}/detections/count"),
            step,
            detections.len() as f64,
        );
        for detection in detections {
            let kind = match detection.shape {
                DetectionShape::Box { .. } => "boxes",
                DetectionShape::Keypoints(_) => "pose",
            };
            sink.log_scalar(
                &format!("{video_path}/{kind}/{}", detection.label),
                step,
                f64::from(detection.confidence),
            );
        }
    }

    fn teardown(&mut self) {
        // Close only; the producer owns the region and unlinks it.
        if let Some(buffer) = self.buffer.take() {
            buffer.close();
        }
    }
}
