//! DCP block bodies
//!
//! A block is a run of `[u32 BE length][bincode DcpMessage]` records. The
//! decoder is lenient: a record whose declared length disagrees with the
//! bytes actually present is dropped with a warning and decoding stops,
//! keeping every record before it.

use crate::{ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use dds_types::DcpMessage;
use tracing::warn;

/// Block payload budget, leaving room under the five-digit frame limit.
pub const MAX_BLOCK_BYTES: usize = 90_000;
pub const MAX_BLOCK_MESSAGES: usize = 100;

const RECORD_PREFIX: usize = 4;

#[derive(Debug, Default)]
pub struct BlockEncoder {
    buf: BytesMut,
    count: usize,
}

impl BlockEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message if it fits. `Ok(false)` means the block is full and
    /// the caller should hold the message for the next block.
    pub fn try_push(&mut self, msg: &DcpMessage) -> Result<bool> {
        if self.count >= MAX_BLOCK_MESSAGES {
            return Ok(false);
        }
        let encoded = bincode::serialize(msg)?;
        let record_len = RECORD_PREFIX + encoded.len();
        if record_len > MAX_BLOCK_BYTES {
            return Err(ProtocolError::MessageTooLarge {
                size: record_len,
                max: MAX_BLOCK_BYTES,
            });
        }
        if self.buf.len() + record_len > MAX_BLOCK_BYTES {
            return Ok(false);
        }
        self.buf.put_u32(encoded.len() as u32);
        self.buf.put_slice(&encoded);
        self.count += 1;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

pub fn decode_block(body: &[u8]) -> Vec<DcpMessage> {
    let mut messages = Vec::new();
    let mut offset = 0;

    while offset < body.len() {
        let remaining = body.len() - offset;
        if remaining < RECORD_PREFIX {
            warn!(offset, remaining, "Trailing bytes in DCP block shorter than a record header, discarding");
            break;
        }
        let mut len_bytes = [0u8; RECORD_PREFIX];
        len_bytes.copy_from_slice(&body[offset..offset + RECORD_PREFIX]);
        let declared = u32::from_be_bytes(len_bytes) as usize;
        offset += RECORD_PREFIX;

        let available = body.len() - offset;
        if declared > available {
            warn!(
                offset,
                declared,
                available,
                "DCP block record length exceeds bytes present, discarding record"
            );
            break;
        }

        match bincode::deserialize::<DcpMessage>(&body[offset..offset + declared]) {
            Ok(msg) => messages.push(msg),
            Err(e) => warn!(offset, declared, error = %e, "Undecodable DCP block record, skipping"),
        }
        offset += declared;
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dds_types::{DcpAddress, SourceType};

    fn msg(n: u32, size: usize) -> DcpMessage {
        DcpMessage::new(DcpAddress::new(n), SourceType::GoesSelfTimed, Utc::now(), vec![b'x'; size])
    }

    #[test]
    fn test_block_keeps_message_order() {
        let mut enc = BlockEncoder::new();
        for n in 0..5 {
            assert!(enc.try_push(&msg(n, 32)).unwrap());
        }
        let decoded = decode_block(&enc.finish());
        let addrs: Vec<u32> = decoded.iter().map(|m| m.address.value()).collect();
        assert_eq!(addrs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_block_stops_at_message_limit() {
        let mut enc = BlockEncoder::new();
        for n in 0..MAX_BLOCK_MESSAGES as u32 {
            assert!(enc.try_push(&msg(n, 8)).unwrap());
        }
        assert!(!enc.try_push(&msg(999, 8)).unwrap());
        assert_eq!(enc.len(), MAX_BLOCK_MESSAGES);
    }

    #[test]
    fn test_block_stops_at_byte_budget() {
        let mut enc = BlockEncoder::new();
        let mut pushed = 0;
        while enc.try_push(&msg(pushed, 20_000)).unwrap() {
            pushed += 1;
        }
        assert_eq!(pushed, 4);
        assert!(enc.finish().len() <= MAX_BLOCK_BYTES);
    }

    #[test]
    fn test_overrunning_record_is_discarded() {
        let mut enc = BlockEncoder::new();
        enc.try_push(&msg(1, 16)).unwrap();
        enc.try_push(&msg(2, 16)).unwrap();
        let mut body = enc.finish().to_vec();
        body.truncate(body.len() - 3);

        let decoded = decode_block(&body);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].address.value(), 1);
    }
}
