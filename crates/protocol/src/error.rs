//! Protocol error types

use thiserror::Error;

/// Errors produced while encoding, parsing, or reassembling wire packets
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Header does not start with the expected magic word
    #[error("bad magic word: {found:#010x}")]
    BadMagic { found: u32 },

    /// Wire protocol version is not supported by this host
    #[error("unsupported wire version: {version} (expected {expected})")]
    UnsupportedVersion { version: u8, expected: u8 },

    /// Packet kind byte is not a known type tag
    #[error("unknown packet kind: {kind}")]
    UnknownKind { kind: u8 },

    /// Payload length exceeds the maximum allowed size
    #[error("payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Payload checksum does not match the header
    #[error("checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    /// Buffer is too short to contain a complete header
    #[error("incomplete header: expected {expected} bytes, got {actual}")]
    IncompleteHeader { expected: usize, actual: usize },

    /// Serialization error from postcard
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::ChecksumMismatch {
            expected: 0xdead_beef,
            computed: 0x1234_5678,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("checksum mismatch"));
        assert!(msg.contains("0xdeadbeef"));
    }

    #[test]
    fn test_payload_too_large_display() {
        let err = ProtocolError::PayloadTooLarge {
            size: 10_000_000,
            max: 8_388_608,
        };
        assert!(format!("{}", err).contains("payload too large"));
    }
}
