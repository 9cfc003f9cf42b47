//! Driver provisioning boundary
//!
//! When a matching device cannot be opened for direct access the host
//! needs a driver binding (WinUSB on Windows, a udev grant on Linux)
//! before streaming can start. That installation happens out of band;
//! this module only re-probes the device until the OS reports it ready,
//! bounded by a timeout. Failures surface as a user-actionable status,
//! never a silent retry loop.

use common::{Result, TetherError, TransportError};
use rusb::{Context, UsbContext};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Outcome of a provisioning attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverStatus {
    /// The device is now openable for direct access
    Ready,
    /// The device never became accessible within the timeout
    Failed(String),
}

/// External-collaborator boundary for driver installation
pub trait DriverProvisioner: Send {
    /// Block until the device is ready for direct access or the timeout
    /// elapses. Invoked off the streaming hot path.
    fn ensure_driver(
        &mut self,
        vendor_id: u16,
        product_id: u16,
        timeout: Duration,
    ) -> Result<DriverStatus>;
}

/// Default provisioner: polls the device until it opens
///
/// The actual driver installation is performed by the platform utility the
/// first time the device is plugged in; this just waits for its effect.
pub struct SystemProvisioner {
    poll_interval: Duration,
}

impl SystemProvisioner {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl Default for SystemProvisioner {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl DriverProvisioner for SystemProvisioner {
    fn ensure_driver(
        &mut self,
        vendor_id: u16,
        product_id: u16,
        timeout: Duration,
    ) -> Result<DriverStatus> {
        let context = Context::new()
            .map_err(|e| TetherError::Transport(TransportError::Usb(e.to_string())))?;
        let deadline = Instant::now() + timeout;

        info!(
            "waiting up to {:?} for {:04x}:{:04x} to become accessible",
            timeout, vendor_id, product_id
        );

        loop {
            if let Some(handle) = context.open_device_with_vid_pid(vendor_id, product_id) {
                drop(handle);
                info!("device {:04x}:{:04x} is accessible", vendor_id, product_id);
                return Ok(DriverStatus::Ready);
            }

            if Instant::now() >= deadline {
                debug!("driver wait for {:04x}:{:04x} timed out", vendor_id, product_id);
                return Ok(DriverStatus::Failed(format!(
                    "device {:04x}:{:04x} still inaccessible after {:?}; driver installation required",
                    vendor_id, product_id, timeout
                )));
            }

            thread::sleep(self.poll_interval);
        }
    }
}
