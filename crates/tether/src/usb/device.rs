//! USB device access
//!
//! Enumeration against the configured ID filters, exclusive open with
//! kernel-driver detach, bulk endpoint discovery, and the blocking
//! [`Transport`] implementation used by the reader thread. The handle is
//! released on every exit path: dropping a [`TetherDevice`] releases the
//! claimed interface and closes the handle.

use common::{TetherError, TransportError};
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, Direction, TransferType, UsbContext};
use std::time::Duration;
use tracing::{debug, warn};

use crate::transport::Transport;
use crate::usb::profile::{UsbId, UsbIdFilter, is_android_vendor};

/// Identity of an attached tether device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub device_address: u8,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    /// One-line human-readable description
    pub fn description(&self) -> String {
        format!(
            "{:04x}:{:04x} {} {}",
            self.vendor_id,
            self.product_id,
            self.manufacturer.as_deref().unwrap_or("?"),
            self.product.as_deref().unwrap_or("?"),
        )
    }

    pub fn usb_id(&self) -> UsbId {
        UsbId {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
        }
    }
}

/// An opened, claimed tether device
///
/// Exclusively owned by the transport reader for the lifetime of a session.
pub struct TetherDevice {
    handle: DeviceHandle<Context>,
    info: DeviceInfo,
    interface: u8,
    in_endpoint: u8,
    out_endpoint: u8,
}

impl TetherDevice {
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }
}

impl Drop for TetherDevice {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.interface) {
            debug!(
                "could not release interface {} on {}: {}",
                self.interface,
                self.info.description(),
                e
            );
        }
        debug!("released device {}", self.info.description());
    }
}

impl Transport for TetherDevice {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.handle
            .read_bulk(self.in_endpoint, buf, timeout)
            .map_err(map_transfer_error)
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        self.handle
            .write_bulk(self.out_endpoint, data, timeout)
            .map_err(map_transfer_error)
    }
}

/// Map rusb transfer errors to transport errors
pub(crate) fn map_transfer_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::NoDevice => TransportError::Disconnected,
        other => TransportError::Usb(other.to_string()),
    }
}

/// Map rusb open errors to the tether error taxonomy
fn map_open_error(err: rusb::Error) -> TetherError {
    match err {
        rusb::Error::Access => TetherError::DriverMissing,
        rusb::Error::Busy => TetherError::DeviceBusy,
        rusb::Error::NoDevice => TetherError::Disconnected,
        other => TetherError::Transport(TransportError::Usb(other.to_string())),
    }
}

/// Find and open the first attached device matching any filter
///
/// Opens with exclusive access and claims the interface carrying the bulk
/// endpoint pair. When a matching device exists but cannot be opened, the
/// open failure (`DeviceBusy`, `DriverMissing`) is returned in preference
/// to `DeviceNotFound` so the supervisor can react to it.
pub fn find_device(context: &Context, filters: &[UsbIdFilter]) -> Result<TetherDevice, TetherError> {
    let devices = context
        .devices()
        .map_err(|e| TetherError::Transport(TransportError::Usb(e.to_string())))?;

    let mut open_failure: Option<TetherError> = None;

    for device in devices.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        let (vid, pid) = (descriptor.vendor_id(), descriptor.product_id());
        if !filters.iter().any(|f| f.matches(vid, pid)) {
            continue;
        }

        match open_device(&device, &descriptor) {
            Ok(opened) => {
                debug!("opened tether device {}", opened.info.description());
                return Ok(opened);
            }
            Err(e) => {
                warn!("matching device {:04x}:{:04x} could not be opened: {}", vid, pid, e);
                open_failure = Some(e);
            }
        }
    }

    Err(open_failure.unwrap_or(TetherError::DeviceNotFound))
}

/// Descriptor-only scan for the first device matching any filter
pub(crate) fn first_matching_id(context: &Context, filters: &[UsbIdFilter]) -> Option<UsbId> {
    let devices = context.devices().ok()?;
    for device in devices.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        let (vid, pid) = (descriptor.vendor_id(), descriptor.product_id());
        if filters.iter().any(|f| f.matches(vid, pid)) {
            return Some(UsbId {
                vendor_id: vid,
                product_id: pid,
            });
        }
    }
    None
}

fn open_device(
    device: &Device<Context>,
    descriptor: &DeviceDescriptor,
) -> Result<TetherDevice, TetherError> {
    let handle = device.open().map_err(map_open_error)?;

    let info = read_device_info(device, descriptor, &handle);

    let config = device.active_config_descriptor().map_err(|e| {
        TetherError::Transport(TransportError::Usb(format!(
            "failed to read config descriptor: {}",
            e
        )))
    })?;

    // Find the interface carrying a bulk IN/OUT endpoint pair
    let mut selected: Option<(u8, u8, u8)> = None;
    'search: for interface in config.interfaces() {
        for interface_desc in interface.descriptors() {
            let mut bulk_in = None;
            let mut bulk_out = None;
            for endpoint in interface_desc.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    Direction::In => {
                        if bulk_in.is_none() {
                            bulk_in = Some(endpoint.address());
                        }
                    }
                    Direction::Out => {
                        if bulk_out.is_none() {
                            bulk_out = Some(endpoint.address());
                        }
                    }
                }
            }
            if let (Some(in_ep), Some(out_ep)) = (bulk_in, bulk_out) {
                selected = Some((interface_desc.interface_number(), in_ep, out_ep));
                break 'search;
            }
        }
    }

    let Some((interface, in_endpoint, out_endpoint)) = selected else {
        return Err(TetherError::Transport(TransportError::MissingEndpoint(
            "bulk",
        )));
    };

    // Detach a bound kernel driver before claiming, like any exclusive-access
    // USB consumer has to
    match handle.kernel_driver_active(interface) {
        Ok(true) => {
            debug!("detaching kernel driver from interface {}", interface);
            if let Err(e) = handle.detach_kernel_driver(interface) {
                warn!("failed to detach kernel driver: {}", e);
            }
        }
        Ok(false) => {}
        Err(e) => {
            debug!("could not query kernel driver state: {}", e);
        }
    }

    handle.claim_interface(interface).map_err(|e| match e {
        rusb::Error::Busy => TetherError::DeviceBusy,
        rusb::Error::Access => TetherError::DriverMissing,
        other => TetherError::Transport(TransportError::Usb(other.to_string())),
    })?;

    debug!(
        "claimed interface {} (bulk in {:#04x}, out {:#04x})",
        interface, in_endpoint, out_endpoint
    );

    Ok(TetherDevice {
        handle,
        info,
        interface,
        in_endpoint,
        out_endpoint,
    })
}

fn read_device_info(
    device: &Device<Context>,
    descriptor: &DeviceDescriptor,
    handle: &DeviceHandle<Context>,
) -> DeviceInfo {
    let manufacturer = descriptor
        .manufacturer_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
    let product = descriptor
        .product_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
    let serial_number = descriptor
        .serial_number_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    DeviceInfo {
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        bus_number: device.bus_number(),
        device_address: device.address(),
        manufacturer,
        product,
        serial_number,
    }
}

/// List attached devices that look like tether candidates: known Android
/// handset vendors plus anything matching the extra filters
pub fn list_candidate_devices(
    context: &Context,
    extra_filters: &[UsbIdFilter],
) -> Result<Vec<DeviceInfo>, TetherError> {
    let devices = context
        .devices()
        .map_err(|e| TetherError::Transport(TransportError::Usb(e.to_string())))?;

    let mut found = Vec::new();
    for device in devices.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        let (vid, pid) = (descriptor.vendor_id(), descriptor.product_id());
        if !is_android_vendor(vid) && !extra_filters.iter().any(|f| f.matches(vid, pid)) {
            continue;
        }

        // String descriptors need an open handle; skip them when the open fails
        let info = match device.open() {
            Ok(handle) => read_device_info(&device, &descriptor, &handle),
            Err(_) => DeviceInfo {
                vendor_id: vid,
                product_id: pid,
                bus_number: device.bus_number(),
                device_address: device.address(),
                manufacturer: None,
                product: None,
                serial_number: None,
            },
        };
        found.push(info);
    }

    Ok(found)
}
