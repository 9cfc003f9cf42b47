//! Wire stream reassembly
//!
//! Bulk reads hand back arbitrary chunk boundaries: a chunk may contain a
//! partial header, several packets, or trailing garbage after link-level
//! corruption. [`StreamAssembler`] accumulates chunks and emits complete,
//! checksum-verified packets. Malformed data is classified and dropped,
//! never delivered downstream; the assembler resynchronizes by scanning
//! forward for the next magic word.

use crate::error::ProtocolError;
use crate::wire::{FrameHeader, HEADER_LEN, MAGIC, compute_checksum};
use bytes::{Buf, Bytes, BytesMut};

/// A complete packet lifted off the wire
#[derive(Debug, Clone)]
pub struct WirePacket {
    /// Validated header
    pub header: FrameHeader,
    /// Payload bytes (checksum already verified)
    pub payload: Bytes,
}

/// Why a stretch of input was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Bytes did not start with the magic word
    BadMagic,
    /// Header carried an unsupported wire version
    UnsupportedVersion,
    /// Header carried an unknown packet kind
    UnknownKind,
    /// Declared payload length exceeded the maximum
    Oversized,
    /// Payload checksum did not match the header
    ChecksumMismatch,
}

/// Output of feeding bytes to the assembler
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A complete, verified packet
    Packet(WirePacket),
    /// A stretch of malformed input was dropped
    Discard(DiscardReason),
}

/// Incremental packet reassembler
#[derive(Debug, Default)]
pub struct StreamAssembler {
    buf: BytesMut,
}

impl StreamAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Number of bytes buffered awaiting a complete packet
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Discard all buffered bytes (used when a session is torn down)
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Feed a chunk of raw bytes, returning any completed packets and
    /// discard notices in stream order
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        loop {
            if self.buf.len() < HEADER_LEN {
                break;
            }

            let header = match FrameHeader::parse(&self.buf) {
                Ok(header) => header,
                Err(ProtocolError::BadMagic { .. }) => {
                    // Skip the bad byte and hunt for the next magic word
                    self.advance_to_magic(1);
                    events.push(StreamEvent::Discard(DiscardReason::BadMagic));
                    continue;
                }
                Err(ProtocolError::UnsupportedVersion { .. }) => {
                    self.advance_to_magic(4);
                    events.push(StreamEvent::Discard(DiscardReason::UnsupportedVersion));
                    continue;
                }
                Err(ProtocolError::UnknownKind { .. }) => {
                    self.advance_to_magic(4);
                    events.push(StreamEvent::Discard(DiscardReason::UnknownKind));
                    continue;
                }
                Err(ProtocolError::PayloadTooLarge { .. }) => {
                    self.advance_to_magic(4);
                    events.push(StreamEvent::Discard(DiscardReason::Oversized));
                    continue;
                }
                // Incomplete header cannot happen past the length check above
                Err(_) => break,
            };

            let total = HEADER_LEN + header.payload_len as usize;
            if self.buf.len() < total {
                // Wait for the rest of the payload
                break;
            }

            let mut packet = self.buf.split_to(total);
            let payload = packet.split_off(HEADER_LEN).freeze();

            if compute_checksum(&payload) != header.payload_crc {
                events.push(StreamEvent::Discard(DiscardReason::ChecksumMismatch));
                continue;
            }

            events.push(StreamEvent::Packet(WirePacket { header, payload }));
        }

        events
    }

    /// Drop `from` bytes, then everything up to the next magic word.
    ///
    /// Keeps the longest buffer suffix that could still begin a magic word
    /// so a packet split across chunk boundaries is not lost.
    fn advance_to_magic(&mut self, from: usize) {
        let magic = MAGIC.to_be_bytes();
        self.buf.advance(from.min(self.buf.len()));

        if let Some(pos) = self.buf.windows(4).position(|w| w == magic.as_slice()) {
            self.buf.advance(pos);
            return;
        }

        let len = self.buf.len();
        let mut keep = 0;
        for k in (1..=len.min(3)).rev() {
            if self.buf[len - k..] == magic[..k] {
                keep = k;
                break;
            }
        }
        self.buf.advance(len - keep);
    }
}
