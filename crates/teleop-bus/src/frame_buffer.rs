//! [`SharedFrameBuffer`] – zero-copy shared-memory frame handoff.
//!
//! A fixed-capacity named region holding at most one decoded image, used
//! where camera frames are too large and too frequent for the message
//! channel. The region is a plain file mapped by both processes; its
//! first byte is the four-state handoff tag:
//!
//! ```text
//! Free(0) → Writing(1) → Ready(2) → Reading(3) → Free(0)
//! ```
//!
//! The tag is the sole synchronization primitive. The producer drops
//! frames instead of blocking (a live camera feed loses frames by
//! design), and the consumer copies the image out before releasing the
//! region, since a released region is immediately reusable.
//!
//! Region layout: byte 0 state tag, bytes 1–4 width (u32 LE), bytes 5–8
//! height (u32 LE), pixel rows from byte 9. The channel count is fixed at
//! creation time ([`CHANNELS`]).

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

use memmap2::{MmapMut, MmapOptions};
use tracing::{error, info};

use teleop_types::{ImageFrame, TeleopError};

/// Bytes of header before the pixel data.
pub const HEADER_SIZE: usize = 9;

/// Fixed per-pixel channel count of every buffer.
pub const CHANNELS: u32 = 3;

const STATE_FREE: u8 = 0;
const STATE_WRITING: u8 = 1;
const STATE_READY: u8 = 2;
const STATE_READING: u8 = 3;

/// Region name for one camera's frame buffer.
pub fn frame_buffer_name(camera_id: u8) -> String {
    format!("shm_webcam{camera_id}")
}

/// One-frame shared-memory region shared by a producer and a consumer.
#[derive(Debug)]
pub struct SharedFrameBuffer {
    name: String,
    path: PathBuf,
    map: MmapMut,
    /// Pixel-byte capacity (region size minus header).
    capacity: usize,
}

impl SharedFrameBuffer {
    /// Create the named region under `dir`, sized for one
    /// `width × height ×` [`CHANNELS`] frame, and initialize it to `Free`.
    ///
    /// The producer calls this once at setup and is the only side allowed
    /// to [`unlink`][Self::unlink] the region at teardown. A leftover file
    /// from a crashed run is re-initialized rather than trusted: a stale
    /// `Ready` tag from a dead producer would wedge the consumer.
    pub fn create(dir: &Path, name: &str, width: u32, height: u32) -> Result<Self, TeleopError> {
        let capacity = (width as usize) * (height as usize) * (CHANNELS as usize);
        let total = HEADER_SIZE + capacity;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.shm"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| unavailable(name, &path, "create", &e))?;
        file.set_len(total as u64)
            .map_err(|e| unavailable(name, &path, "size", &e))?;
        let map = unsafe {
            MmapOptions::new()
                .map_mut(&file)
                .map_err(|e| unavailable(name, &path, "map", &e))?
        };
        let buffer = Self {
            name: name.to_string(),
            path,
            map,
            capacity,
        };
        buffer.state().store(STATE_FREE, Ordering::Release);
        info!(name = %buffer.name, bytes = total, "created shared frame buffer");
        Ok(buffer)
    }

    /// Attach to an existing region by name without re-initializing it.
    ///
    /// Consumers attach; only the creating producer may unlink.
    pub fn attach(dir: &Path, name: &str) -> Result<Self, TeleopError> {
        let path = dir.join(format!("{name}.shm"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| unavailable(name, &path, "attach", &e))?;
        let map = unsafe {
            MmapOptions::new()
                .map_mut(&file)
                .map_err(|e| unavailable(name, &path, "map", &e))?
        };
        if map.len() < HEADER_SIZE {
            return Err(TeleopError::ChannelUnavailable {
                name: name.to_string(),
                reason: format!("region {} is smaller than its header", path.display()),
            });
        }
        let capacity = map.len() - HEADER_SIZE;
        info!(name, bytes = map.len(), "attached to shared frame buffer");
        Ok(Self {
            name: name.to_string(),
            path,
            map,
            capacity,
        })
    }

    /// Pixel-byte capacity of the region.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish one frame if the region is free.
    ///
    /// Returns `Ok(false)` without copying when the previous frame has not
    /// been consumed yet (the producer drops the frame and keeps serving
    /// ticks) or when the frame is not packed [`CHANNELS`]-per-pixel data.
    /// A frame that does not fit the region reverts the state to `Free`
    /// and fails with [`TeleopError::FrameTooLarge`].
    pub fn write_frame(&mut self, frame: &ImageFrame) -> Result<bool, TeleopError> {
        if self
            .state()
            .compare_exchange(STATE_FREE, STATE_WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Ok(false);
        }

        if !frame.is_packed(CHANNELS) {
            error!(
                name = %self.name,
                got = frame.data.len(),
                expected = frame.expected_len(CHANNELS),
                "frame is not packed {CHANNELS}-channel data; dropping"
            );
            self.state().store(STATE_FREE, Ordering::Release);
            return Ok(false);
        }
        let len = frame.data.len();
        if len > self.capacity {
            self.state().store(STATE_FREE, Ordering::Release);
            return Err(TeleopError::FrameTooLarge {
                required: len,
                capacity: self.capacity,
            });
        }

        self.map[1..5].copy_from_slice(&frame.width.to_le_bytes());
        self.map[5..9].copy_from_slice(&frame.height.to_le_bytes());
        self.map[HEADER_SIZE..HEADER_SIZE + len].copy_from_slice(&frame.data);
        self.state().store(STATE_READY, Ordering::Release);
        Ok(true)
    }

    /// Take the published frame if one is ready.
    ///
    /// The image is copied out before the region is released: as soon as
    /// the state returns to `Free` the producer may overwrite the bytes.
    pub fn read_frame(&mut self) -> Option<ImageFrame> {
        if self
            .state()
            .compare_exchange(STATE_READY, STATE_READING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        let width = u32::from_le_bytes([self.map[1], self.map[2], self.map[3], self.map[4]]);
        let height = u32::from_le_bytes([self.map[5], self.map[6], self.map[7], self.map[8]]);
        let len = (width as usize) * (height as usize) * (CHANNELS as usize);
        if len > self.capacity {
            error!(
                name = %self.name,
                width,
                height,
                capacity = self.capacity,
                "header describes a frame larger than the region; resetting"
            );
            self.state().store(STATE_FREE, Ordering::Release);
            return None;
        }
        let data = self.map[HEADER_SIZE..HEADER_SIZE + len].to_vec();
        self.state().store(STATE_FREE, Ordering::Release);
        Some(ImageFrame {
            width,
            height,
            data,
        })
    }

    /// Release the local mapping. Consumers stop here.
    pub fn close(self) {}

    /// Delete the named region from the system. Producer side only.
    pub fn unlink(self) -> Result<(), TeleopError> {
        let path = self.path.clone();
        drop(self);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TeleopError::Io(e)),
        }
    }

    /// Atomic view of the state tag at byte 0. The mapping is shared with
    /// the peer process, so every tag access goes through this.
    fn state(&self) -> &AtomicU8 {
        unsafe { &*(self.map.as_ptr() as *const AtomicU8) }
    }
}

fn unavailable(name: &str, path: &Path, action: &str, err: &std::io::Error) -> TeleopError {
    TeleopError::ChannelUnavailable {
        name: name.to_string(),
        reason: format!("{action} {}: {err}", path.display()),
    }
}
