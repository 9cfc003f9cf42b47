//! Lifecycle and reconnection supervisor
//!
//! The supervisor owns the connection state machine:
//!
//! ```text
//! Disconnected -> Enumerating -> (DriverPending ->) Connected -> Streaming
//!       ^                                                           |
//!       +---------- Error(reason) / clean unplug <------------------+
//! ```
//!
//! It is the only component that transitions connection state and the only
//! one permitted to tear down and recreate the worker threads. On any
//! session end the reader and decoder are signalled to stop after their
//! current unit of work, joined, and every session-owned resource (USB
//! handle, queue contents, assembler buffer) is released before the next
//! enumeration attempt. Reconnection runs on a fixed backoff instead of
//! busy-polling.

use async_channel::{Receiver, Sender};
use common::{Result, TetherError, TransportError};
use protocol::HostCommand;
use rusb::Context;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::TetherConfig;
use crate::decode::{DecoderContext, run_decoder};
use crate::provision::{DriverProvisioner, DriverStatus};
use crate::queue::FrameQueue;
use crate::state::{ConnectionState, SharedState};
use crate::transport::{ReaderContext, Transport, run_reader};
use crate::usb::accessory::convert_first_candidate;
use crate::usb::device::{DeviceInfo, find_device, first_matching_id};

/// Outcome of one connection attempt
pub enum Connection {
    /// A streaming-capable device was opened and claimed
    Ready {
        transport: Box<dyn Transport>,
        info: DeviceInfo,
    },
    /// A candidate phone was switched into accessory mode and will
    /// re-enumerate shortly
    Converting,
    /// A matching device exists but needs a driver binding first
    DriverPending { vendor_id: u16, product_id: u16 },
}

/// Produces transports for the supervisor
///
/// The USB implementation is [`UsbConnector`]; tests and simulations
/// substitute their own.
pub trait Connect: Send {
    fn connect(&mut self, config: &TetherConfig) -> Result<Connection>;
}

/// Connects to real hardware through rusb
pub struct UsbConnector {
    context: Context,
}

impl UsbConnector {
    pub fn new(context: Context) -> Self {
        Self { context }
    }
}

impl Connect for UsbConnector {
    fn connect(&mut self, config: &TetherConfig) -> Result<Connection> {
        let filters = config.device.stream_filters()?;

        match find_device(&self.context, &filters) {
            Ok(device) => Ok(Connection::Ready {
                info: device.info().clone(),
                transport: Box::new(device),
            }),
            Err(TetherError::DriverMissing) => match first_matching_id(&self.context, &filters) {
                Some(id) => Ok(Connection::DriverPending {
                    vendor_id: id.vendor_id,
                    product_id: id.product_id,
                }),
                None => Err(TetherError::DriverMissing),
            },
            Err(TetherError::DeviceNotFound) if config.device.auto_convert => {
                let candidates = config.device.conversion_filters()?;
                let identity = config.device.accessory_identity();
                if convert_first_candidate(&self.context, &candidates, &identity)? {
                    Ok(Connection::Converting)
                } else {
                    Err(TetherError::DeviceNotFound)
                }
            }
            Err(e) => Err(e),
        }
    }
}

/// Messages delivered to the supervisor thread
pub(crate) enum SupervisorEvent {
    /// The reader hit a fatal transport error and stopped
    TransportFailed(TransportError),
    /// The owning [`crate::Tether`] is shutting down
    Shutdown,
}

enum SessionEnd {
    Shutdown,
    Fault(TransportError),
}

pub(crate) struct Supervisor {
    pub config: TetherConfig,
    pub connector: Box<dyn Connect>,
    pub provisioner: Box<dyn DriverProvisioner>,
    pub shared: Arc<SharedState>,
    pub events_tx: Sender<SupervisorEvent>,
    pub events_rx: Receiver<SupervisorEvent>,
    pub commands_tx: Sender<HostCommand>,
    pub commands_rx: Receiver<HostCommand>,
}

impl Supervisor {
    pub(crate) fn run(mut self) {
        info!("tether supervisor started");

        loop {
            if self.shutdown_requested() {
                break;
            }

            self.shared.set_state(ConnectionState::Enumerating);

            match self.connector.connect(&self.config) {
                Ok(Connection::Ready { transport, info }) => {
                    info!("tether device attached: {}", info.description());
                    self.shared.set_state(ConnectionState::Connected);

                    match self.run_session(transport) {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Fault(TransportError::Disconnected) => {
                            info!("tether device unplugged");
                            self.shared.metrics.record_reconnect();
                            self.shared.set_state(ConnectionState::Disconnected);
                        }
                        SessionEnd::Fault(err) => {
                            warn!("streaming session failed: {}", err);
                            self.shared.metrics.record_reconnect();
                            self.shared
                                .set_state(ConnectionState::Error(err.to_string()));
                        }
                    }
                }
                Ok(Connection::Converting) => {
                    // Wait out the re-enumeration in the normal backoff
                    self.shared.set_state(ConnectionState::Disconnected);
                }
                Ok(Connection::DriverPending {
                    vendor_id,
                    product_id,
                }) => {
                    self.shared.set_state(ConnectionState::DriverPending);
                    let wait = self.config.reconnect.driver_wait();
                    match self.provisioner.ensure_driver(vendor_id, product_id, wait) {
                        Ok(DriverStatus::Ready) => continue,
                        Ok(DriverStatus::Failed(reason)) => {
                            warn!("driver provisioning failed: {}", reason);
                            self.shared.set_state(ConnectionState::Error(reason));
                        }
                        Err(e) => {
                            warn!("driver provisioning error: {}", e);
                            self.shared
                                .set_state(ConnectionState::Error(e.to_string()));
                        }
                    }
                }
                Err(TetherError::DeviceNotFound) => {
                    debug!("no tether device attached");
                    self.shared.set_state(ConnectionState::Disconnected);
                }
                Err(e) => {
                    warn!("enumeration failed: {}", e);
                    self.shared.set_state(ConnectionState::Error(e.to_string()));
                }
            }

            if self.wait_backoff() {
                break;
            }
            self.shared.set_state(ConnectionState::Disconnected);
        }

        self.shared.set_state(ConnectionState::Disconnected);
        info!("tether supervisor stopped");
    }

    /// Run one streaming session to completion
    ///
    /// Spawns the reader and decoder threads, waits for a fatal transport
    /// event or shutdown, then stops and joins both workers. The USB
    /// handle is dropped inside the reader thread when it exits.
    fn run_session(&mut self, transport: Box<dyn Transport>) -> SessionEnd {
        let stop = Arc::new(AtomicBool::new(false));
        let queue = Arc::new(FrameQueue::new(self.config.pipeline.queue_depth));

        let reader_ctx = ReaderContext {
            transport,
            settings: self.config.transport.clone(),
            queue: queue.clone(),
            shared: self.shared.clone(),
            commands: self.commands_rx.clone(),
            events: self.events_tx.clone(),
            stop: stop.clone(),
        };
        let reader = thread::Builder::new()
            .name("tether-reader".to_string())
            .spawn(move || run_reader(reader_ctx))
            .expect("failed to spawn transport reader thread");

        let decoder_ctx = DecoderContext {
            queue: queue.clone(),
            shared: self.shared.clone(),
            settings: self.config.pipeline.clone(),
            stop: stop.clone(),
        };
        let decoder = thread::Builder::new()
            .name("tether-decoder".to_string())
            .spawn(move || run_decoder(decoder_ctx))
            .expect("failed to spawn frame decoder thread");

        if self.commands_tx.try_send(HostCommand::StartStream).is_err() {
            warn!("command queue full, start-stream request not queued");
        }
        self.shared.set_state(ConnectionState::Streaming);

        let end = match self.events_rx.recv_blocking() {
            Ok(SupervisorEvent::TransportFailed(err)) => SessionEnd::Fault(err),
            Ok(SupervisorEvent::Shutdown) => {
                // Best effort: the reader drains this before it stops
                let _ = self.commands_tx.try_send(HostCommand::StopStream);
                SessionEnd::Shutdown
            }
            Err(_) => SessionEnd::Fault(TransportError::Usb(
                "supervisor event channel closed".to_string(),
            )),
        };

        // Stop both workers after their current unit of work; joining them
        // releases everything the session owned, including the USB handle
        stop.store(true, Ordering::Release);
        queue.close();
        if reader.join().is_err() {
            error!("transport reader panicked");
        }
        if decoder.join().is_err() {
            error!("frame decoder panicked");
        }

        end
    }

    /// Drain pending events, reporting whether shutdown was requested.
    /// Stale transport events from a torn-down session are discarded.
    fn shutdown_requested(&self) -> bool {
        loop {
            match self.events_rx.try_recv() {
                Ok(SupervisorEvent::Shutdown) => return true,
                Ok(SupervisorEvent::TransportFailed(_)) => continue,
                Err(_) => return false,
            }
        }
    }

    /// Sleep out the reconnect backoff, waking early for shutdown.
    /// Returns true when shutdown was requested.
    fn wait_backoff(&self) -> bool {
        const POLL: Duration = Duration::from_millis(50);
        let deadline = Instant::now() + self.config.reconnect.backoff();

        loop {
            if self.shutdown_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(POLL));
        }
    }
}
