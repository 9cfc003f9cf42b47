//! USB tether pipeline for a phone-based stereo viewer
//!
//! Streams live JPEG-compressed stereo frames from a phone in Android
//! accessory mode into the host's rendering pipeline and carries control
//! traffic back to the phone, presenting the device to the host engine as
//! an HMD target.
//!
//! The pipeline runs on three dedicated contexts: a transport reader that
//! owns the USB handle and issues bulk reads, a decoder that turns JPEG
//! payloads into pixel buffers, and the caller's render thread, which
//! polls [`HmdAdapter`] and never blocks. A supervisor thread owns the
//! connection state machine and rebuilds the pipeline on disconnect.
//!
//! ```no_run
//! use tether::{Tether, TetherConfig};
//!
//! let tether = Tether::spawn(TetherConfig::default())?;
//! let adapter = tether.adapter();
//!
//! // once per render frame:
//! if let Some(frame) = adapter.current_frame() {
//!     let pose = adapter.current_pose();
//!     // upload `frame.pixels` and composite with `pose`
//! }
//!
//! tether.shutdown();
//! # Ok::<(), tether::TetherError>(())
//! ```

pub mod adapter;
pub mod config;
pub mod control;
pub mod decode;
pub mod frame;
pub mod provision;
pub mod queue;
pub mod state;
pub mod supervisor;
pub mod transport;
pub mod usb;

pub use adapter::HmdAdapter;
pub use config::{
    AccessorySettings, DeviceSettings, PipelineSettings, ReconnectSettings, TetherConfig,
    TransportSettings,
};
pub use control::ControlHandle;
pub use frame::{CompressedFrame, DecodedFrame, FrameFormat};
pub use provision::{DriverProvisioner, DriverStatus, SystemProvisioner};
pub use state::ConnectionState;
pub use supervisor::{Connect, Connection, UsbConnector};
pub use transport::Transport;
pub use usb::{DeviceInfo, UsbId, UsbIdFilter};

pub use common::{PipelineStats, Result, TetherError, TransportError};
pub use protocol::{DeviceStatus, HostCommand, PoseSample, ViewerParams};

use async_channel::Sender;
use std::thread::{self, JoinHandle};
use supervisor::{Supervisor, SupervisorEvent};
use tracing::error;

/// Owning handle for a running tether pipeline
///
/// Construct one at plugin initialization, hand its [`HmdAdapter`] to the
/// renderer boundary, and call [`Tether::shutdown`] (or drop it) at
/// shutdown. There is no ambient global: the pipeline lives exactly as
/// long as this handle.
pub struct Tether {
    adapter: HmdAdapter,
    control: ControlHandle,
    events_tx: Sender<SupervisorEvent>,
    supervisor: Option<JoinHandle<()>>,
}

impl Tether {
    /// Spawn the pipeline against real USB hardware
    pub fn spawn(config: TetherConfig) -> Result<Self> {
        let context = rusb::Context::new()
            .map_err(|e| TetherError::Transport(TransportError::Usb(e.to_string())))?;
        let connector = UsbConnector::new(context);
        Self::spawn_with(
            config,
            Box::new(connector),
            Box::new(SystemProvisioner::default()),
        )
    }

    /// Spawn the pipeline with a custom connector and provisioner
    ///
    /// Used by tests and simulations to run the full pipeline without
    /// hardware attached.
    pub fn spawn_with(
        config: TetherConfig,
        connector: Box<dyn Connect>,
        provisioner: Box<dyn DriverProvisioner>,
    ) -> Result<Self> {
        config.validate()?;

        let shared = std::sync::Arc::new(state::SharedState::new());
        let (events_tx, events_rx) = async_channel::bounded(16);
        let (commands_tx, commands_rx) = async_channel::bounded(32);

        let adapter = HmdAdapter::new(shared.clone());
        let control = ControlHandle::new(commands_tx.clone());

        let supervisor = Supervisor {
            config,
            connector,
            provisioner,
            shared,
            events_tx: events_tx.clone(),
            events_rx,
            commands_tx,
            commands_rx,
        };

        let handle = thread::Builder::new()
            .name("tether-supervisor".to_string())
            .spawn(move || supervisor.run())
            .map_err(TetherError::Io)?;

        Ok(Self {
            adapter,
            control,
            events_tx,
            supervisor: Some(handle),
        })
    }

    /// The non-blocking view for the render thread
    pub fn adapter(&self) -> HmdAdapter {
        self.adapter.clone()
    }

    /// The control channel to the device
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Stop every pipeline context after its current unit of work and
    /// release the device
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(handle) = self.supervisor.take() {
            let _ = self.events_tx.send_blocking(SupervisorEvent::Shutdown);
            if handle.join().is_err() {
                error!("tether supervisor panicked");
            }
        }
    }
}

impl Drop for Tether {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
