//! Frame data types
//!
//! A [`CompressedFrame`] is lifted off the wire by the transport reader and
//! consumed exactly once by the decoder. A [`DecodedFrame`] is the
//! GPU-presentable result: one interleaved pixel buffer holding both eye
//! views side by side.

use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// A JPEG-compressed stereo frame as received from the device
#[derive(Debug, Clone)]
pub struct CompressedFrame {
    /// Monotonically increasing sequence number (per session)
    pub sequence: u64,
    /// Device capture timestamp, microseconds
    pub timestamp_us: u64,
    /// Raw JPEG bytes
    pub data: Bytes,
}

/// Pixel layout of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Interleaved 8-bit RGB
    Rgb8,
    /// 8-bit grayscale
    Gray8,
}

impl FrameFormat {
    /// Bytes per pixel for this layout
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            FrameFormat::Rgb8 => 3,
            FrameFormat::Gray8 => 1,
        }
    }
}

/// A decoded stereo frame ready for GPU upload
///
/// The pixel buffer holds the full side-by-side image: the left eye view in
/// columns `0..width/2`, the right eye view in columns `width/2..width`.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Sequence number of the source compressed frame
    pub sequence: u64,
    /// Device capture timestamp, microseconds
    pub capture_timestamp_us: u64,
    /// Host decode timestamp, microseconds since the Unix epoch
    pub decode_timestamp_us: u64,
    /// Full image width in pixels (both eyes)
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Pixel layout
    pub format: FrameFormat,
    /// Interleaved pixel data, `height` rows of `stride()` bytes
    pub pixels: Vec<u8>,
}

impl DecodedFrame {
    /// Width of a single eye view in pixels
    pub fn eye_width(&self) -> u32 {
        self.width / 2
    }

    /// Bytes per image row
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }
}

/// Current wall-clock time in microseconds since the Unix epoch
pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
