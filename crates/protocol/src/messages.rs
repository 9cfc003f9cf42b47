//! Control and status message payloads
//!
//! Pose, status, and command packets carry postcard-encoded payloads.
//! Video frames are raw JPEG bytes and never pass through here.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Head pose reported by the device
///
/// Most-recent-wins: older samples are discardable once a newer one arrives,
/// so these are stored in a last-write-wins cell rather than queued.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    /// Orientation as a unit quaternion (x, y, z, w)
    pub orientation: [f32; 4],
    /// Position in metres, if the device tracks position
    pub position: Option<[f32; 3]>,
    /// Device timestamp this sample corresponds to, microseconds
    pub timestamp_us: u64,
}

impl PoseSample {
    /// Identity orientation at the given timestamp
    pub fn identity(timestamp_us: u64) -> Self {
        Self {
            orientation: [0.0, 0.0, 0.0, 1.0],
            position: None,
            timestamp_us,
        }
    }
}

/// Viewer display parameters reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewerParams {
    /// Full display width in pixels (both eyes, side by side)
    pub width: u32,
    /// Display height in pixels
    pub height: u32,
    /// Interpupillary distance in millimetres
    pub ipd_mm: f32,
}

/// Periodic device status report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Battery charge, 0-100
    pub battery_percent: u8,
    /// Current viewer display parameters
    pub viewer: ViewerParams,
}

/// Host-to-device control command
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum HostCommand {
    /// Begin streaming video frames
    StartStream,
    /// Stop streaming video frames
    StopStream,
    /// Set the interpupillary distance in millimetres
    SetIpd { mm: f32 },
    /// Request a different capture resolution
    SetViewerSize { width: u32, height: u32 },
}

/// Encode a message payload using postcard
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(ProtocolError::from)
}

/// Decode a message payload using postcard
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    postcard::from_bytes(bytes).map_err(ProtocolError::from)
}
