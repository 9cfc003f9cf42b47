//! Wire protocol for the HMD tether link
//!
//! This crate defines the packet format exchanged with the phone-based
//! stereo viewer over USB bulk transfers, and the reassembly logic that
//! turns an arbitrary chunked byte stream back into packets.
//!
//! Every packet is a fixed 32-byte big-endian header (magic word, version,
//! type tag, sequence number, device timestamp, payload length, payload
//! CRC32) followed by the payload. Video frames carry raw JPEG bytes;
//! pose, status, and command packets carry postcard-encoded payloads.
//!
//! # Example
//!
//! ```
//! use protocol::{PacketKind, StreamAssembler, StreamEvent, encode_packet};
//!
//! let wire = encode_packet(PacketKind::VideoFrame, 1, 0, b"jpeg bytes").unwrap();
//!
//! let mut assembler = StreamAssembler::new();
//! let events = assembler.feed(&wire);
//! assert!(matches!(events[0], StreamEvent::Packet(_)));
//! ```

pub mod assembler;
pub mod error;
pub mod messages;
pub mod wire;

pub use assembler::{DiscardReason, StreamAssembler, StreamEvent, WirePacket};
pub use error::{ProtocolError, Result};
pub use messages::{
    DeviceStatus, HostCommand, PoseSample, ViewerParams, decode_payload, encode_payload,
};
pub use wire::{
    FrameHeader, HEADER_LEN, MAGIC, MAX_PAYLOAD_LEN, PacketKind, WIRE_VERSION, compute_checksum,
    encode_packet, verify_checksum,
};
