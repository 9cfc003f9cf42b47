//! Shared pipeline state
//!
//! The double-buffered frame slot, the latest pose/status cells, and the
//! connection state all live here behind atomic pointer swaps. The decoder
//! and transport reader store new values; the presentation adapter loads
//! them without ever taking a lock across decode or render.

use arc_swap::{ArcSwap, ArcSwapOption};
use common::PipelineMetrics;
use protocol::{DeviceStatus, PoseSample};
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::frame::DecodedFrame;

/// Connection lifecycle state
///
/// Owned by the supervisor: every other component only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No device attached, or between reconnect attempts
    Disconnected,
    /// Scanning the bus for a matching device
    Enumerating,
    /// Waiting for a driver binding or permission grant
    DriverPending,
    /// Device opened and claimed, stream not yet running
    Connected,
    /// Frames are flowing
    Streaming,
    /// A session failed; cleanup has run and a retry is scheduled
    Error(String),
}

impl ConnectionState {
    /// True when a device is currently attached
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Streaming)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Enumerating => write!(f, "Enumerating"),
            ConnectionState::DriverPending => write!(f, "DriverPending"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Streaming => write!(f, "Streaming"),
            ConnectionState::Error(reason) => write!(f, "Error({})", reason),
        }
    }
}

/// State shared between the supervisor, the worker threads, and the adapter
pub(crate) struct SharedState {
    /// Double-buffered frame slot: the decoder stores, the adapter loads.
    /// The swap is atomic, so a reader sees either the previous complete
    /// frame or the new complete frame, never a partial write.
    frame: ArcSwapOption<DecodedFrame>,
    /// Latest pose sample, last-write-wins
    pose: ArcSwapOption<PoseSample>,
    /// Latest device status report, last-write-wins
    status: ArcSwapOption<DeviceStatus>,
    /// Connection state, transitioned only by the supervisor
    state: ArcSwap<ConnectionState>,
    /// Cumulative pipeline counters
    pub(crate) metrics: PipelineMetrics,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self {
            frame: ArcSwapOption::const_empty(),
            pose: ArcSwapOption::const_empty(),
            status: ArcSwapOption::const_empty(),
            state: ArcSwap::from_pointee(ConnectionState::Disconnected),
            metrics: PipelineMetrics::new(),
        }
    }

    pub(crate) fn publish_frame(&self, frame: DecodedFrame) {
        self.frame.store(Some(Arc::new(frame)));
    }

    pub(crate) fn latest_frame(&self) -> Option<Arc<DecodedFrame>> {
        self.frame.load_full()
    }

    pub(crate) fn publish_pose(&self, pose: PoseSample) {
        self.pose.store(Some(Arc::new(pose)));
    }

    pub(crate) fn latest_pose(&self) -> Option<PoseSample> {
        self.pose.load_full().map(|pose| *pose)
    }

    pub(crate) fn publish_status(&self, status: DeviceStatus) {
        self.status.store(Some(Arc::new(status)));
    }

    pub(crate) fn latest_status(&self) -> Option<DeviceStatus> {
        self.status.load_full().map(|status| *status)
    }

    /// Transition the connection state (supervisor only)
    pub(crate) fn set_state(&self, next: ConnectionState) {
        let prev = self.state.swap(Arc::new(next.clone()));
        if *prev != next {
            info!("connection state: {} -> {}", prev, next);
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        (*self.state.load_full()).clone()
    }
}
