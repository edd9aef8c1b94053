//! Frame header and message ids

use crate::status::ServerStatus;
use crate::{ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const SYNC: &[u8; 4] = b"FAF0";
pub const HEADER_LEN: usize = 10;
/// Largest body a five-digit length field can carry.
pub const MAX_BODY_LEN: usize = 99_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MessageId {
    Hello = b'a',
    Goodbye = b'b',
    Criteria = b'g',
    Idle = b'h',
    AuthHello = b'm',
    DcpBlock = b'n',
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub id: MessageId,
    pub body_len: usize,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(SYNC);
        out[4] = self.id.into();
        let digits = format!("{:05}", self.body_len.min(MAX_BODY_LEN));
        out[5..].copy_from_slice(digits.as_bytes());
        out
    }

    /// Decodes the 10-byte header. The sync and length are validated before
    /// the id so a desynchronized stream reports a sync error.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::MessageTooSmall {
                need: HEADER_LEN,
                got: buf.len(),
                context: "frame header".to_string(),
            });
        }
        if &buf[..4] != SYNC {
            let mut actual = [0u8; 4];
            actual.copy_from_slice(&buf[..4]);
            return Err(ProtocolError::InvalidSync { actual });
        }

        let field = &buf[5..HEADER_LEN];
        if !field.iter().all(u8::is_ascii_digit) {
            return Err(ProtocolError::InvalidLength {
                field: String::from_utf8_lossy(field).into_owned(),
            });
        }
        let body_len = field
            .iter()
            .fold(0usize, |acc, d| acc * 10 + (d - b'0') as usize);

        let id = MessageId::try_from(buf[4])
            .map_err(|_| ProtocolError::UnknownMessageId { id: buf[4] })?;

        Ok(Self { id, body_len })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: MessageId,
    pub body: Bytes,
}

impl Frame {
    pub fn new(id: MessageId, body: impl Into<Bytes>) -> Result<Self> {
        let body = body.into();
        if body.len() > MAX_BODY_LEN {
            return Err(ProtocolError::MessageTooLarge {
                size: body.len(),
                max: MAX_BODY_LEN,
            });
        }
        Ok(Self { id, body })
    }

    pub fn empty(id: MessageId) -> Self {
        Self {
            id,
            body: Bytes::new(),
        }
    }

    pub fn text(id: MessageId, text: &str) -> Result<Self> {
        Self::new(id, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            id: self.id,
            body_len: self.body.len(),
        }
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_LEN + self.body.len());
        buf.put_slice(&self.header().encode());
        buf.put_slice(&self.body);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Status responses start with `?`.
    pub fn status(&self) -> Option<ServerStatus> {
        if self.body.first() == Some(&b'?') {
            ServerStatus::parse(&self.body).ok()
        } else {
            None
        }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim_end_matches('\0').to_string()
    }
}
