//! Binary wire header layout
//!
//! Every packet on the tether link is a fixed 32-byte big-endian header
//! followed by a payload:
//!
//! ```text
//! offset  size  field
//! 0       4     magic        0x484D4431 ("HMD1")
//! 4       1     version      wire protocol version
//! 5       1     kind         packet type tag
//! 6       2     reserved     must be zero
//! 8       8     sequence     per-kind monotonically increasing counter
//! 16      8     timestamp_us device clock, microseconds
//! 24      4     payload_len  payload bytes following the header
//! 28      4     payload_crc  CRC32 over the payload
//! ```
//!
//! Video frames carry raw JPEG bytes; pose, status, and command packets
//! carry postcard-encoded payloads (see [`crate::messages`]).

use crate::error::{ProtocolError, Result};
use byteorder::{BigEndian, ByteOrder};

/// Magic word at the start of every packet ("HMD1")
pub const MAGIC: u32 = 0x484D_4431;

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Fixed header size in bytes
pub const HEADER_LEN: usize = 32;

/// Maximum allowed payload size (8 MiB) to prevent memory exhaustion
pub const MAX_PAYLOAD_LEN: usize = 8 * 1024 * 1024;

/// Packet type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// JPEG-compressed stereo video frame (device -> host)
    VideoFrame,
    /// Head pose sample (device -> host)
    Pose,
    /// Device status report (device -> host)
    Status,
    /// Host control command (host -> device)
    Command,
}

impl PacketKind {
    /// Wire representation of this kind
    pub fn as_u8(self) -> u8 {
        match self {
            PacketKind::VideoFrame => 1,
            PacketKind::Pose => 2,
            PacketKind::Status => 3,
            PacketKind::Command => 4,
        }
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PacketKind::VideoFrame),
            2 => Ok(PacketKind::Pose),
            3 => Ok(PacketKind::Status),
            4 => Ok(PacketKind::Command),
            kind => Err(ProtocolError::UnknownKind { kind }),
        }
    }
}

/// Parsed packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Packet type tag
    pub kind: PacketKind,
    /// Per-kind monotonically increasing sequence number
    pub sequence: u64,
    /// Device capture timestamp in microseconds
    pub timestamp_us: u64,
    /// Payload length in bytes
    pub payload_len: u32,
    /// CRC32 over the payload bytes
    pub payload_crc: u32,
}

impl FrameHeader {
    /// Parse a header from the start of `buf`
    ///
    /// Validates magic word, version, kind, and payload length bound.
    /// Requires at least [`HEADER_LEN`] bytes.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::IncompleteHeader {
                expected: HEADER_LEN,
                actual: buf.len(),
            });
        }

        let magic = BigEndian::read_u32(&buf[0..4]);
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic { found: magic });
        }

        let version = buf[4];
        if version != WIRE_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                version,
                expected: WIRE_VERSION,
            });
        }

        let kind = PacketKind::try_from(buf[5])?;
        let sequence = BigEndian::read_u64(&buf[8..16]);
        let timestamp_us = BigEndian::read_u64(&buf[16..24]);
        let payload_len = BigEndian::read_u32(&buf[24..28]);
        let payload_crc = BigEndian::read_u32(&buf[28..32]);

        if payload_len as usize > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len as usize,
                max: MAX_PAYLOAD_LEN,
            });
        }

        Ok(Self {
            kind,
            sequence,
            timestamp_us,
            payload_len,
            payload_crc,
        })
    }

    /// Encode this header into its 32-byte wire form
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        BigEndian::write_u32(&mut buf[0..4], MAGIC);
        buf[4] = WIRE_VERSION;
        buf[5] = self.kind.as_u8();
        // bytes 6..8 reserved, already zero
        BigEndian::write_u64(&mut buf[8..16], self.sequence);
        BigEndian::write_u64(&mut buf[16..24], self.timestamp_us);
        BigEndian::write_u32(&mut buf[24..28], self.payload_len);
        BigEndian::write_u32(&mut buf[28..32], self.payload_crc);
        buf
    }
}

/// Compute the CRC32 checksum over payload bytes
#[inline]
pub fn compute_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Verify the CRC32 checksum over payload bytes
#[inline]
pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    compute_checksum(data) == expected
}

/// Encode a complete packet (header + payload) ready for a bulk write
pub fn encode_packet(
    kind: PacketKind,
    sequence: u64,
    timestamp_us: u64,
    payload: &[u8],
) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let header = FrameHeader {
        kind,
        sequence,
        timestamp_us,
        payload_len: payload.len() as u32,
        payload_crc: compute_checksum(payload),
    };

    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
    packet.extend_from_slice(&header.encode());
    packet.extend_from_slice(payload);
    Ok(packet)
}
