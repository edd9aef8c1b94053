//! Framed TCP Transport
//!
//! One LDDS frame per request or response over a plain TCP stream. Reads go
//! through an internal buffer so `receive_frame` is cancel-safe: dropping it
//! inside a `timeout` or `select!` never loses bytes already read.

use crate::{Result, TransportError};
use bytes::BytesMut;
use dds_codec::{Frame, FrameHeader, HEADER_LEN};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

pub struct FrameConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    connected_at: Instant,
    last_activity: Instant,
    bytes_sent: u64,
    bytes_received: u64,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
}

impl FrameConnection {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            stream,
            peer_addr,
            connected_at: now,
            last_activity: now,
            bytes_sent: 0,
            bytes_received: 0,
            read_buffer: BytesMut::with_capacity(16 * 1024),
            write_buffer: BytesMut::with_capacity(16 * 1024),
        }
    }

    /// Connect to `host:port` within `connect_timeout`.
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let target = format!("{}:{}", host, port);
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| TransportError::timeout(format!("connect {}", target), connect_timeout.as_millis() as u64))?
            .map_err(|e| TransportError::connection_with_source(format!("Failed to connect to {}", target), None, e))?;

        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::network_with_source("Failed to set TCP_NODELAY", e))?;
        let peer_addr = stream
            .peer_addr()
            .map_err(|e| TransportError::network_with_source("Failed to get peer address", e))?;

        debug!(peer = %peer_addr, "Connected");
        Ok(Self::new(stream, peer_addr))
    }

    pub async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_buffer.clear();
        frame.encode_into(&mut self.write_buffer);

        self.stream
            .write_all(&self.write_buffer)
            .await
            .map_err(|e| TransportError::connection_with_source("Failed to write frame", Some(self.peer_addr), e))?;
        self.stream
            .flush()
            .await
            .map_err(|e| TransportError::connection_with_source("Failed to flush TCP stream", Some(self.peer_addr), e))?;

        self.bytes_sent += self.write_buffer.len() as u64;
        self.last_activity = Instant::now();

        debug!(
            peer = %self.peer_addr,
            id = ?frame.id,
            bytes = frame.body.len(),
            total_sent = self.bytes_sent,
            "Sent frame"
        );
        Ok(())
    }

    /// Reads the next complete frame. Cancel-safe.
    pub async fn receive_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.parse_buffered()? {
                self.last_activity = Instant::now();
                debug!(
                    peer = %self.peer_addr,
                    id = ?frame.id,
                    bytes = frame.body.len(),
                    total_received = self.bytes_received,
                    "Received frame"
                );
                return Ok(frame);
            }

            let n = self
                .stream
                .read_buf(&mut self.read_buffer)
                .await
                .map_err(|e| TransportError::connection_with_source("Failed to read frame", Some(self.peer_addr), e))?;
            if n == 0 {
                let message = if self.read_buffer.is_empty() {
                    "Peer closed connection"
                } else {
                    "Peer closed connection mid-frame"
                };
                return Err(TransportError::connection(message, Some(self.peer_addr)));
            }
            self.bytes_received += n as u64;
        }
    }

    fn parse_buffered(&mut self) -> Result<Option<Frame>> {
        if self.read_buffer.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = FrameHeader::decode(&self.read_buffer[..HEADER_LEN])?;
        let total = HEADER_LEN + header.body_len;
        if self.read_buffer.len() < total {
            self.read_buffer.reserve(total - self.read_buffer.len());
            return Ok(None);
        }
        let raw = self.read_buffer.split_to(total).freeze();
        Ok(Some(Frame {
            id: header.id,
            body: raw.slice(HEADER_LEN..),
        }))
    }

    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}
