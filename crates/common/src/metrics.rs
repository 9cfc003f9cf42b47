//! Pipeline counters
//!
//! Thread-safe counters shared by the transport reader, the decoder, the
//! supervisor, and the presentation adapter. Dropped and malformed frames
//! must be observable, never silently hidden, so every drop path increments
//! a counter here. Counters are cumulative across reconnect cycles.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe pipeline counters
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Raw bytes received over the bulk IN endpoint
    bytes_received: AtomicU64,
    /// Complete video frames lifted off the wire
    frames_received: AtomicU64,
    /// Frames discarded by drop-oldest backpressure
    frames_dropped: AtomicU64,
    /// Wire-level discards (bad magic, bad checksum, oversized)
    frames_corrupt: AtomicU64,
    /// Missing sequence numbers observed in the video stream
    sequence_gaps: AtomicU64,
    /// Frames decoded and published to the presentation slot
    frames_decoded: AtomicU64,
    /// JPEG decode failures
    decode_errors: AtomicU64,
    /// Pose samples received
    poses_received: AtomicU64,
    /// Control commands written to the device
    commands_sent: AtomicU64,
    /// Control command writes that exhausted their retries
    write_failures: AtomicU64,
    /// Completed reconnect cycles
    reconnects: AtomicU64,
}

impl PipelineMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_corrupt(&self) {
        self.frames_corrupt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sequence_gap(&self, missing: u64) {
        self.sequence_gaps.fetch_add(missing, Ordering::Relaxed);
    }

    pub fn record_frame_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pose_received(&self) {
        self.poses_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Take a consistent-enough snapshot of all counters
    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_corrupt: self.frames_corrupt.load(Ordering::Relaxed),
            sequence_gaps: self.sequence_gaps.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            poses_received: self.poses_received.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of the pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub bytes_received: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub frames_corrupt: u64,
    pub sequence_gaps: u64,
    pub frames_decoded: u64,
    pub decode_errors: u64,
    pub poses_received: u64,
    pub commands_sent: u64,
    pub write_failures: u64,
    pub reconnects: u64,
}

impl PipelineStats {
    /// One-line summary for periodic status logging
    pub fn summary(&self) -> String {
        format!(
            "rx {} frames ({}), decoded {}, dropped {}, corrupt {}, gaps {}, decode errors {}, reconnects {}",
            self.frames_received,
            format_bytes(self.bytes_received),
            self.frames_decoded,
            self.frames_dropped,
            self.frames_corrupt,
            self.sequence_gaps,
            self.decode_errors,
            self.reconnects,
        )
    }
}

/// Format bytes as a human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
