//! `teleop-bus` – the inter-process transport layer.
//!
//! Two primitives move data between worker processes:
//!
//! - [`FifoChannel`] – a named, single-writer/single-reader message channel
//!   backed by a POSIX named pipe, carrying framed [`Envelope`]s with
//!   latest-wins consumption ([`FifoChannel::poll_latest`]).
//! - [`SharedFrameBuffer`] – a fixed-size shared-memory region moving one
//!   decoded camera frame at a time without touching the message channel.
//!
//! Channel and buffer names derive deterministically from a [`ChannelKind`]
//! (plus a numeric instance id for per-camera channels), so independently
//! launched producer and consumer processes agree on a rendezvous point
//! without any discovery service.
//!
//! [`Envelope`]: teleop_types::Envelope

use std::path::PathBuf;

pub mod channel;
pub(crate) mod codec;
pub mod frame_buffer;

pub use channel::{ChannelKind, FifoChannel};
pub use frame_buffer::{frame_buffer_name, SharedFrameBuffer, CHANNELS, HEADER_SIZE};

/// Root of the pipeline's on-disk rendezvous tree.
///
/// Defaults to `/tmp/teleop`; override with `TELEOP_WORK_DIR` when running
/// several pipelines side by side.
pub fn work_dir() -> PathBuf {
    std::env::var_os("TELEOP_WORK_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp/teleop"))
}

/// Directory holding the named pipes.
pub fn fifo_dir() -> PathBuf {
    work_dir().join("fifo")
}

/// Directory holding the shared frame-buffer regions.
pub fn shm_dir() -> PathBuf {
    work_dir().join("shm")
}
