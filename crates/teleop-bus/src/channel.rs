//! [`FifoChannel`] – named-pipe message channel with latest-wins reads.
//!
//! A channel is a unidirectional byte stream between exactly one writer
//! process and one reader process, rendezvousing on a filesystem path
//! derived from a [`ChannelKind`]. Records are framed by [`crate::codec`].
//!
//! The read side deliberately does **not** expose strict FIFO delivery:
//! this is a control loop, not a log. A consumer that fell behind must act
//! on the newest command, so [`FifoChannel::poll_latest`] drains the
//! backlog and discards every data envelope but the most recent one.
//! Control envelopes (poison pill, session start) are exempt from the drop
//! rule and are delivered one per call, oldest first.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tracing::{debug, warn};

use teleop_types::{Envelope, Payload, TeleopError};

use crate::codec;

/// Logical identity of a channel. The producer and consumer construct the
/// same kind independently and land on the same pipe path; per-camera
/// channels carry their numeric instance id in the kind itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Scheduler → leader-read tick channel.
    LeaderRead,
    /// Leader-read → follower-control position channel.
    FollowerControl,
    /// Follower-control → sim-step position channel.
    SimStep,
    /// Follower-control → mirror-kinematics joint-angle channel.
    MirrorKinematics,
    /// Follower-control → webcam-capture trigger channel for one camera.
    WebcamCapture(u8),
    /// Webcam-capture → detect-objects signal channel for one camera.
    DetectObjects(u8),
}

impl ChannelKind {
    /// Logical channel name, also used as the telemetry label.
    pub fn name(&self) -> String {
        match self {
            ChannelKind::LeaderRead => "leader_read".to_string(),
            ChannelKind::FollowerControl => "follower_control".to_string(),
            ChannelKind::SimStep => "sim_step".to_string(),
            ChannelKind::MirrorKinematics => "mirror_kinematics".to_string(),
            ChannelKind::WebcamCapture(id) => format!("webcam_capture{id}"),
            ChannelKind::DetectObjects(id) => format!("detect_objects{id}"),
        }
    }

    /// Pipe file name under the fifo directory.
    pub fn file_name(&self) -> String {
        format!("{}.fifo", self.name())
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

enum ReadOutcome {
    Data,
    WouldBlock,
    Interrupted,
    Eof,
}

/// A named, single-writer/single-reader message channel.
///
/// Lifecycle: [`FifoChannel::new`] creates the underlying pipe (idempotent
/// across the two ends), then exactly one process calls
/// [`open_write`][Self::open_write] and one calls
/// [`open_read`][Self::open_read]; each open blocks until the peer arrives
/// (standard named-pipe rendezvous). [`close`][Self::close] is idempotent.
pub struct FifoChannel {
    name: String,
    path: PathBuf,
    reader: Option<File>,
    writer: Option<File>,
    /// Raw bytes read off the pipe, not yet parsed into whole records.
    acc: Vec<u8>,
    /// Control envelopes awaiting delivery, oldest first.
    pending_control: VecDeque<Envelope>,
    /// Newest data envelope seen since the last delivery.
    latest_data: Option<Envelope>,
    eof: bool,
    closed: bool,
}

impl FifoChannel {
    /// Create (or reuse) the named pipe for `kind` under `dir`.
    pub fn new(dir: &Path, kind: ChannelKind) -> Result<Self, TeleopError> {
        let name = kind.name();
        std::fs::create_dir_all(dir).map_err(|e| TeleopError::ChannelUnavailable {
            name: name.clone(),
            reason: format!("cannot create {}: {e}", dir.display()),
        })?;
        let path = dir.join(kind.file_name());
        match mkfifo(&path, Mode::from_bits_truncate(0o644)) {
            Ok(()) => {}
            Err(nix::errno::Errno::EEXIST) => {}
            Err(e) => {
                return Err(TeleopError::ChannelUnavailable {
                    name,
                    reason: format!("mkfifo {}: {e}", path.display()),
                });
            }
        }
        Ok(Self {
            name,
            path,
            reader: None,
            writer: None,
            acc: Vec::new(),
            pending_control: VecDeque::new(),
            latest_data: None,
            eof: false,
            closed: false,
        })
    }

    /// Logical channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open the read end. Blocks until the writer has opened its end.
    pub fn open_read(&mut self) -> Result<(), TeleopError> {
        self.ensure_not_closed()?;
        if self.reader.is_some() {
            return Ok(());
        }
        let file = File::open(&self.path).map_err(|e| self.unavailable("open for read", &e))?;
        self.reader = Some(file);
        Ok(())
    }

    /// Open the write end. Blocks until the reader has opened its end.
    pub fn open_write(&mut self) -> Result<(), TeleopError> {
        self.ensure_not_closed()?;
        if self.writer.is_some() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| self.unavailable("open for write", &e))?;
        self.writer = Some(file);
        Ok(())
    }

    /// Append one framed envelope to the stream.
    ///
    /// Blocks only on pipe-buffer backpressure. Failures surface to the
    /// caller; nothing is retried internally.
    pub fn write(&mut self, envelope: &Envelope) -> Result<(), TeleopError> {
        let frame = codec::encode(envelope).map_err(|reason| TeleopError::Codec {
            channel: self.name.clone(),
            reason,
        })?;
        let file = self
            .writer
            .as_mut()
            .ok_or_else(|| TeleopError::ChannelUnavailable {
                name: self.name.clone(),
                reason: "channel is not open for writing".to_string(),
            })?;
        file.write_all(&frame)
            .map_err(|e| TeleopError::ChannelUnavailable {
                name: self.name.clone(),
                reason: format!("write: {e}"),
            })
    }

    /// Broadcast the shutdown sentinel. Consumers must forward it before
    /// exiting so the signal reaches every leaf of the topology.
    pub fn send_poison_pill(&mut self) -> Result<(), TeleopError> {
        self.write(&Envelope::control(Payload::PoisonPill))
    }

    /// Announce a new recording session downstream.
    pub fn send_session_start(&mut self, session_id: &str) -> Result<(), TeleopError> {
        self.write(&Envelope::control(Payload::SessionStart(
            session_id.to_string(),
        )))
    }

    /// Return the most recent data envelope, never a stale one.
    ///
    /// Drains every complete record currently buffered in the pipe without
    /// blocking, then:
    ///
    /// - a pending control envelope (poison pill, session start) is
    ///   returned first, one per call, in arrival order — control records
    ///   are never dropped by the latest-wins rule;
    /// - otherwise the newest data envelope is returned and every older
    ///   one the drain found is discarded;
    /// - otherwise the call blocks until at least one record arrives.
    ///
    /// Returns `None` only once the writer has closed the channel and the
    /// backlog is fully delivered.
    pub fn poll_latest(&mut self) -> Result<Option<Envelope>, TeleopError> {
        self.drain_nonblocking()?;
        loop {
            if let Some(control) = self.pending_control.pop_front() {
                return Ok(Some(control));
            }
            if let Some(data) = self.latest_data.take() {
                return Ok(Some(data));
            }
            if self.eof {
                if !self.acc.is_empty() {
                    warn!(
                        channel = %self.name,
                        trailing_bytes = self.acc.len(),
                        "writer closed mid-record; discarding partial frame"
                    );
                    self.acc.clear();
                }
                return Ok(None);
            }
            self.read_blocking()?;
            self.drain_nonblocking()?;
        }
    }

    /// Release both ends. Idempotent; safe to call on a never-opened
    /// channel. A closed channel cannot be reopened by this process.
    pub fn close(&mut self) {
        self.reader = None;
        self.writer = None;
        self.closed = true;
    }

    /// Remove the pipe from the filesystem. The creator side calls this
    /// after [`close`][Self::close] during final teardown.
    pub fn unlink(&self) -> Result<(), TeleopError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TeleopError::Io(e)),
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Internal read machinery
    // ────────────────────────────────────────────────────────────────────

    /// One blocking read. Sets `eof` when the writer has closed.
    fn read_blocking(&mut self) -> Result<(), TeleopError> {
        self.set_reader_nonblocking(false)?;
        loop {
            match self.read_chunk()? {
                ReadOutcome::Data | ReadOutcome::Eof => return Ok(()),
                // A signal may interrupt the blocking read; retry.
                ReadOutcome::Interrupted => continue,
                // Cannot happen in blocking mode, but restarting is harmless.
                ReadOutcome::WouldBlock => continue,
            }
        }
    }

    /// Pull everything currently available off the pipe without blocking,
    /// then parse the accumulated bytes into records.
    fn drain_nonblocking(&mut self) -> Result<(), TeleopError> {
        if self.reader.is_none() || self.eof {
            return self.parse_records();
        }
        self.set_reader_nonblocking(true)?;
        loop {
            match self.read_chunk()? {
                ReadOutcome::Data => continue,
                ReadOutcome::Interrupted => continue,
                ReadOutcome::WouldBlock | ReadOutcome::Eof => break,
            }
        }
        self.parse_records()
    }

    fn read_chunk(&mut self) -> Result<ReadOutcome, TeleopError> {
        let file = self
            .reader
            .as_mut()
            .ok_or_else(|| TeleopError::ChannelUnavailable {
                name: self.name.clone(),
                reason: "channel is not open for reading".to_string(),
            })?;
        let mut chunk = [0u8; 8192];
        match file.read(&mut chunk) {
            Ok(0) => {
                self.eof = true;
                Ok(ReadOutcome::Eof)
            }
            Ok(n) => {
                self.acc.extend_from_slice(&chunk[..n]);
                Ok(ReadOutcome::Data)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(ReadOutcome::Interrupted),
            Err(e) => Err(TeleopError::ChannelUnavailable {
                name: self.name.clone(),
                reason: format!("read: {e}"),
            }),
        }
    }

    /// Parse whole records out of `acc`, routing control envelopes to the
    /// pending queue and keeping only the newest data envelope.
    fn parse_records(&mut self) -> Result<(), TeleopError> {
        loop {
            match codec::decode(&self.acc) {
                Ok(Some((envelope, consumed))) => {
                    self.acc.drain(..consumed);
                    if envelope.payload.is_control() {
                        self.pending_control.push_back(envelope);
                    } else {
                        if let Some(stale) = self.latest_data.replace(envelope) {
                            debug!(
                                channel = %self.name,
                                step = stale.step,
                                "dropping stale cycle in favor of a newer one"
                            );
                        }
                    }
                }
                Ok(None) => return Ok(()),
                Err(reason) => {
                    return Err(TeleopError::Codec {
                        channel: self.name.clone(),
                        reason,
                    });
                }
            }
        }
    }

    fn set_reader_nonblocking(&mut self, enabled: bool) -> Result<(), TeleopError> {
        let file = self
            .reader
            .as_ref()
            .ok_or_else(|| TeleopError::ChannelUnavailable {
                name: self.name.clone(),
                reason: "channel is not open for reading".to_string(),
            })?;
        set_nonblocking(file, enabled).map_err(|e| TeleopError::ChannelUnavailable {
            name: self.name.clone(),
            reason: format!("fcntl: {e}"),
        })
    }

    fn ensure_not_closed(&self) -> Result<(), TeleopError> {
        if self.closed {
            return Err(TeleopError::ChannelUnavailable {
                name: self.name.clone(),
                reason: "channel was closed and cannot be reopened".to_string(),
            });
        }
        Ok(())
    }

    fn unavailable(&self, action: &str, err: &std::io::Error) -> TeleopError {
        TeleopError::ChannelUnavailable {
            name: self.name.clone(),
            reason: format!("{action} {}: {err}", self.path.display()),
        }
    }
}

fn set_nonblocking(file: &File, enabled: bool) -> Result<(), std::io::Error> {
    let fd = file.as_raw_fd();
    let bits = fcntl(fd, FcntlArg::F_GETFL)?;
    let mut flags = OFlag::from_bits_retain(bits);
    flags.set(OFlag::O_NONBLOCK, enabled);
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}
