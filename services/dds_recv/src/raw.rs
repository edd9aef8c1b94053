//! Raw satellite frame intake and sequence-gap detection
//!
//! A [`RawFrameSource`] yields sequence-numbered frames from whatever link
//! carries them. The gap detector watches the 16-bit sequence and registers
//! a sequence outage for every run it missed, so the recovery engine can
//! backfill it from upstream peers.
//!
//! Frame layout on the wire:
//!
//! ```text
//! ┌──────────┬──────────────┬─────────────────┐
//! │ seq u16  │ length u32   │ payload         │
//! │ (BE)     │ (BE)         │ (length bytes)  │
//! └──────────┴──────────────┴─────────────────┘
//! ```

use crate::error::{RecvError, Result};
use crate::queue::OutageQueue;
use async_trait::async_trait;
use bytes::{Buf, Bytes};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub const FRAME_HEADER_LEN: usize = 6;

/// Largest datagram a [`UdpFrameSource`] reads.
const MAX_DATAGRAM: usize = 65_507;

const HALF_SEQUENCE_SPACE: u16 = 0x8000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub sequence: u16,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Frame(RawFrame),
    /// Nothing arrived within the timeout.
    Timeout,
}

/// Narrow capability over a frame-producing link. An `Err` means the source
/// cannot continue.
#[async_trait]
pub trait RawFrameSource: Send {
    fn name(&self) -> &str;

    async fn next_frame(&mut self, timeout: Duration) -> Result<FrameEvent>;
}

/// Splits a received buffer into a frame.
///
/// A buffer shorter than its declared length is discarded; a longer one is
/// truncated to the declared length. Both are logged.
pub fn parse_raw_frame(mut buf: Bytes) -> Option<RawFrame> {
    if buf.len() < FRAME_HEADER_LEN {
        warn!(bytes = buf.len(), "Raw frame shorter than its header, discarded");
        return None;
    }
    let sequence = buf.get_u16();
    let declared = buf.get_u32() as usize;
    let actual = buf.len();

    if actual < declared {
        warn!(sequence, declared, actual, "Raw frame short of its declared length, discarded");
        return None;
    }
    if actual > declared {
        warn!(sequence, declared, actual, "Raw frame longer than declared, truncated");
        buf.truncate(declared);
    }
    Some(RawFrame {
        sequence,
        payload: buf,
    })
}

/// Frames arriving as UDP datagrams, one frame per datagram.
pub struct UdpFrameSource {
    name: String,
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpFrameSource {
    pub async fn bind(name: impl Into<String>, addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| RecvError::frame_source(format!("failed to bind {}: {}", addr, e)))?;
        let name = name.into();
        info!(source = %name, addr = %addr, "Raw frame source listening");
        Ok(Self {
            name,
            socket,
            buf: vec![0; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| RecvError::frame_source(e.to_string()))
    }
}

#[async_trait]
impl RawFrameSource for UdpFrameSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_frame(&mut self, timeout: Duration) -> Result<FrameEvent> {
        loop {
            let received = match tokio::time::timeout(timeout, self.socket.recv_from(&mut self.buf)).await {
                Err(_) => return Ok(FrameEvent::Timeout),
                Ok(r) => r.map_err(|e| RecvError::frame_source(format!("{}: {}", self.name, e)))?.0,
            };
            let datagram = Bytes::copy_from_slice(&self.buf[..received]);
            if let Some(frame) = parse_raw_frame(datagram) {
                return Ok(FrameEvent::Frame(frame));
            }
        }
    }
}

/// Tracks the wrapping 16-bit frame sequence of one source.
#[derive(Debug, Default)]
pub struct SequenceGapDetector {
    last: Option<u16>,
}

impl SequenceGapDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<u16> {
        self.last
    }

    /// Feeds the next sequence number. Returns the missed run, if any, as
    /// `(first, last)`; the run may wrap, so `first > last` is possible here.
    ///
    /// Repeats are ignored. A jump backward (more than half the sequence
    /// space forward) is treated as the link restarting.
    pub fn observe(&mut self, seq: u16) -> Option<(u16, u16)> {
        let Some(last) = self.last else {
            self.last = Some(seq);
            return None;
        };
        if seq == last {
            return None;
        }
        self.last = Some(seq);

        let expected = last.wrapping_add(1);
        let skipped = seq.wrapping_sub(expected);
        if skipped == 0 {
            None
        } else if skipped >= HALF_SEQUENCE_SPACE {
            info!(last, seq, "Frame sequence restarted");
            None
        } else {
            Some((expected, seq.wrapping_sub(1)))
        }
    }
}

/// Pumps a frame source: detects gaps, registers them as outages and
/// forwards every frame downstream.
pub struct FrameIntake<S: RawFrameSource> {
    source: S,
    detector: SequenceGapDetector,
    queue: OutageQueue,
    frames: mpsc::Sender<RawFrame>,
    poll_timeout: Duration,
}

impl<S: RawFrameSource> FrameIntake<S> {
    pub fn new(source: S, queue: OutageQueue, frames: mpsc::Sender<RawFrame>, poll_timeout: Duration) -> Self {
        Self {
            source,
            detector: SequenceGapDetector::new(),
            queue,
            frames,
            poll_timeout,
        }
    }

    /// Handles one frame. Returns false once nobody is listening downstream.
    pub async fn handle(&mut self, frame: RawFrame) -> bool {
        if let Some((begin, end)) = self.detector.observe(frame.sequence) {
            warn!(source = %self.source.name(), begin, end, "Frame sequence gap");
            if let Err(e) = self.queue.register_sequence_gap(self.source.name(), begin, end) {
                error!(source = %self.source.name(), error = %e, "Could not register sequence outage");
            }
        }
        self.frames.send(frame).await.is_ok()
    }

    /// Runs until shutdown, a fatal source error, or the downstream channel
    /// closing.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        while !*shutdown.borrow() {
            let event = tokio::select! {
                event = self.source.next_frame(self.poll_timeout) => event,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };
            match event {
                Ok(FrameEvent::Frame(frame)) => {
                    if !self.handle(frame).await {
                        debug!(source = %self.source.name(), "Frame consumer gone");
                        return Ok(());
                    }
                }
                Ok(FrameEvent::Timeout) => {
                    debug!(source = %self.source.name(), "No frames within poll timeout");
                }
                Err(e) => {
                    error!(source = %self.source.name(), error = %e, "Frame source failed");
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
