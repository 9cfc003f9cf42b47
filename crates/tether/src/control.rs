//! Host-to-device control channel
//!
//! Commands are queued on a bounded channel and written by the transport
//! reader between bulk reads. Sending never blocks; when the queue is full
//! the command is refused rather than stalling the caller.

use async_channel::{Sender, TrySendError};
use common::{Result, TetherError};
use protocol::HostCommand;

/// Handle for sending control commands to the device
#[derive(Clone)]
pub struct ControlHandle {
    commands: Sender<HostCommand>,
}

impl ControlHandle {
    pub(crate) fn new(commands: Sender<HostCommand>) -> Self {
        Self { commands }
    }

    /// Ask the device to begin streaming video frames
    pub fn start_stream(&self) -> Result<()> {
        self.send(HostCommand::StartStream)
    }

    /// Ask the device to stop streaming video frames
    pub fn stop_stream(&self) -> Result<()> {
        self.send(HostCommand::StopStream)
    }

    /// Set the interpupillary distance in millimetres
    pub fn set_ipd(&self, mm: f32) -> Result<()> {
        self.send(HostCommand::SetIpd { mm })
    }

    /// Request a different capture resolution
    pub fn set_viewer_size(&self, width: u32, height: u32) -> Result<()> {
        self.send(HostCommand::SetViewerSize { width, height })
    }

    /// Queue an arbitrary command without blocking
    pub fn send(&self, command: HostCommand) -> Result<()> {
        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => TetherError::Channel("command queue full".to_string()),
            TrySendError::Closed(_) => TetherError::Channel("pipeline shut down".to_string()),
        })
    }
}
