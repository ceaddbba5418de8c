//! Webcam-capture worker: grabs one frame per cycle, optionally feeding
//! a detection worker through the shared frame buffer.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use teleop_bus::{FifoChannel, SharedFrameBuffer};
use teleop_hal::Camera;
use teleop_types::{Envelope, MsgType, Payload, TeleopError};

use crate::telemetry::TelemetrySink;
use crate::worker::Worker;

/// Captures one camera frame per trigger and publishes it to telemetry.
///
/// With detection enabled the worker also owns a [`SharedFrameBuffer`]:
/// a successfully written (non-dropped) frame is announced to the
/// companion detect channel with an `ObjectDetectionSignal` envelope, so
/// `publish_outputs` is overridden rather than broadcasting the image.
/// The worker is the buffer's producer and unlinks it at teardown.
pub struct WebcamCaptureWorker {
    name: String,
    camera: Box<dyn Camera>,
    frame_buffer: Option<SharedFrameBuffer>,
}

impl WebcamCaptureWorker {
    /// `camera_id` feeds the worker's telemetry name; when `frame_buffer`
    /// is present, the harness's first output channel must be the
    /// camera's detect channel.
    pub fn new(
        camera_id: u8,
        camera: Box<dyn Camera>,
        frame_buffer: Option<SharedFrameBuffer>,
    ) -> Self {
        Self {
            name: format!("webcam{camera_id}"),
            camera,
            frame_buffer,
        }
    }
}

impl Worker for WebcamCaptureWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_type(&self) -> MsgType {
        MsgType::Empty
    }

    fn output_type(&self) -> MsgType {
        MsgType::RawImage
    }

    fn process(&mut self, _payload: Payload) -> Result<Payload, TeleopError> {
        let frame = self.camera.capture()?;
        Ok(Payload::RawImage(frame))
    }

    fn publish_outputs(
        &mut self,
        outputs: &mut [FifoChannel],
        result: &Payload,
        deadline: DateTime<Utc>,
        step: u64,
    ) -> Result<(), TeleopError> {
        let Payload::RawImage(frame) = result else {
            return Ok(());
        };
        let Some(buffer) = self.frame_buffer.as_mut() else {
            // No detection attached: the frame goes to telemetry only.
            return Ok(());
        };

        match buffer.write_frame(frame) {
            Ok(true) => {
                if let Some(detect) = outputs.first_mut() {
                    detect.write(&Envelope::new(
                        Payload::ObjectDetectionSignal,
                        deadline,
                        step,
                    ))?;
                }
            }
            Ok(false) => {
                // The consumer still holds the previous frame; a live feed
                // loses frames rather than queueing them.
                debug!(worker = %self.name, step, "frame buffer busy; frame dropped");
            }
            Err(e @ TeleopError::FrameTooLarge { .. }) => {
                warn!(worker = %self.name, step, error = %e, "frame dropped");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn publish_data(&mut self, sink: &mut dyn TelemetrySink, step: u64, result: &Payload) {
        if let Payload::RawImage(frame) = result {
            sink.log_image(&format!("/{}/video", self.name), step, frame);
        }
    }

    fn teardown(&mut self) {
        if let Some(buffer) = self.frame_buffer.take() {
            if let Err(e) = buffer.unlink() {
                warn!(worker = %self.name, error = %e, "failed to unlink frame buffer");
            }
        }
    }
}
