//! Error taxonomy for the tether pipeline
//!
//! Local, recoverable faults (malformed wire frames, isolated decode
//! errors) are counted and dropped where they occur and never appear here.
//! These types cover the failures that change connection state or abort an
//! operation.

use thiserror::Error;

/// Transport-level failures on the USB link
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// A single transfer timed out (normal while the link is idle)
    #[error("transfer timed out")]
    Timeout,

    /// No bytes arrived for longer than the configured stall timeout
    #[error("link stalled: no data for {idle_ms} ms")]
    Stalled { idle_ms: u64 },

    /// The device disappeared mid-transfer
    #[error("device disconnected")]
    Disconnected,

    /// The device lacks a required endpoint
    #[error("missing {0} endpoint")]
    MissingEndpoint(&'static str),

    /// Any other USB-level failure
    #[error("usb error: {0}")]
    Usb(String),
}

/// Frame decode failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The JPEG payload is corrupt or truncated
    #[error("jpeg decode failed: {0}")]
    Jpeg(String),

    /// The JPEG decoded to a pixel format we cannot present
    #[error("unsupported pixel format: {0}")]
    Unsupported(String),

    /// The image cannot be split into two equal eye halves
    #[error("stereo layout mismatch: width {width} is not divisible by 2")]
    BadLayout { width: u32 },
}

/// Top-level error type for tether operations
#[derive(Debug, Error)]
pub enum TetherError {
    /// No attached USB device matches the configured ID filters
    #[error("no matching tether device attached")]
    DeviceNotFound,

    /// A matching device exists but is held by another process
    #[error("tether device is busy (held by another process)")]
    DeviceBusy,

    /// The device cannot be opened for direct access; a driver binding or
    /// permission grant is required first
    #[error("driver binding missing or access denied")]
    DriverMissing,

    /// Transport failure on the USB link
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame decode failure
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The device was cleanly unplugged
    #[error("device disconnected")]
    Disconnected,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal channel error
    #[error("channel error: {0}")]
    Channel(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for tether results
pub type Result<T> = std::result::Result<T, TetherError>;
