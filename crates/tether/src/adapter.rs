//! HMD presentation adapter
//!
//! The only surface the host renderer touches. Every accessor is a plain
//! atomic load: nothing here blocks, takes a lock, or panics, regardless of
//! what the pipeline is doing. Before the first frame or pose ever arrives
//! the accessors return `None`; mid-reconnect they keep returning the last
//! published values.

use common::PipelineStats;
use protocol::{DeviceStatus, PoseSample, ViewerParams};
use std::sync::Arc;

use crate::frame::DecodedFrame;
use crate::state::{ConnectionState, SharedState};

/// Non-blocking view of the tether pipeline for the render thread
#[derive(Clone)]
pub struct HmdAdapter {
    shared: Arc<SharedState>,
}

impl HmdAdapter {
    pub(crate) fn new(shared: Arc<SharedState>) -> Self {
        Self { shared }
    }

    /// Latest decoded stereo frame, or `None` before the first frame ever
    pub fn current_frame(&self) -> Option<Arc<DecodedFrame>> {
        self.shared.latest_frame()
    }

    /// Latest head pose, or `None` before the first sample ever
    pub fn current_pose(&self) -> Option<PoseSample> {
        self.shared.latest_pose()
    }

    /// Latest device status report
    pub fn device_status(&self) -> Option<DeviceStatus> {
        self.shared.latest_status()
    }

    /// Viewer display parameters from the latest status report
    pub fn viewer_params(&self) -> Option<ViewerParams> {
        self.shared.latest_status().map(|status| status.viewer)
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// True while a device is attached (connected or streaming)
    pub fn is_connected(&self) -> bool {
        self.shared.state().is_connected()
    }

    /// Snapshot of the pipeline counters
    pub fn stats(&self) -> PipelineStats {
        self.shared.metrics.snapshot()
    }
}
