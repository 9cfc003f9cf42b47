//! Android accessory-mode (AOAP) provisioning
//!
//! A phone that is not yet in accessory mode exposes no bulk streaming
//! interface. The AOAP handshake switches it over: read the protocol
//! version, send the host identity strings, then start accessory mode.
//! The phone re-enumerates under the accessory VID/PID a moment later,
//! where normal enumeration picks it up.

use common::{Result, TetherError, TransportError};
use rusb::{Context, DeviceHandle, Direction, Recipient, RequestType, UsbContext};
use std::time::Duration;
use tracing::{debug, info};

use crate::usb::profile::UsbIdFilter;

const ACCESSORY_GET_PROTOCOL: u8 = 51;
const ACCESSORY_SEND_STRING: u8 = 52;
const ACCESSORY_START: u8 = 53;

const CONTROL_TIMEOUT: Duration = Duration::from_millis(500);

/// Identity strings sent to the phone during the handshake
#[derive(Debug, Clone)]
pub struct AccessoryIdentity {
    pub manufacturer: String,
    pub model: String,
    pub description: String,
    pub version: String,
    pub uri: String,
    pub serial: String,
}

/// Switch an opened phone into accessory mode
///
/// The device drops off the bus and re-enumerates under the accessory
/// VID/PID on success; the handle is useless afterwards.
pub fn convert_to_accessory(
    handle: &DeviceHandle<Context>,
    identity: &AccessoryIdentity,
) -> Result<()> {
    let version = read_protocol_version(handle)?;
    if version < 1 {
        return Err(TetherError::Transport(TransportError::Usb(format!(
            "accessory protocol not supported (version {})",
            version
        ))));
    }
    debug!("device speaks accessory protocol version {}", version);

    // String indices are fixed by the accessory protocol
    let strings = [
        &identity.manufacturer,
        &identity.model,
        &identity.description,
        &identity.version,
        &identity.uri,
        &identity.serial,
    ];
    for (index, value) in strings.iter().enumerate() {
        send_identity_string(handle, index as u16, value)?;
    }

    let out = rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
    handle
        .write_control(out, ACCESSORY_START, 0, 0, &[], CONTROL_TIMEOUT)
        .map_err(|e| TetherError::Transport(TransportError::Usb(e.to_string())))?;

    Ok(())
}

fn read_protocol_version(handle: &DeviceHandle<Context>) -> Result<u16> {
    let request_type = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
    let mut buf = [0u8; 2];
    let read = handle
        .read_control(request_type, ACCESSORY_GET_PROTOCOL, 0, 0, &mut buf, CONTROL_TIMEOUT)
        .map_err(|e| TetherError::Transport(TransportError::Usb(e.to_string())))?;

    if read < 2 {
        return Err(TetherError::Transport(TransportError::Usb(
            "short accessory protocol version read".to_string(),
        )));
    }

    Ok(u16::from_le_bytes(buf))
}

fn send_identity_string(handle: &DeviceHandle<Context>, index: u16, value: &str) -> Result<()> {
    let request_type = rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
    // Accessory identity strings are zero-terminated on the wire
    let mut data = value.as_bytes().to_vec();
    data.push(0);

    handle
        .write_control(
            request_type,
            ACCESSORY_SEND_STRING,
            0,
            index,
            &data,
            CONTROL_TIMEOUT,
        )
        .map_err(|e| TetherError::Transport(TransportError::Usb(e.to_string())))?;
    Ok(())
}

/// Try to switch the first candidate phone into accessory mode
///
/// Returns `true` when a device accepted the handshake and should
/// re-enumerate shortly.
pub fn convert_first_candidate(
    context: &Context,
    filters: &[UsbIdFilter],
    identity: &AccessoryIdentity,
) -> Result<bool> {
    let devices = context
        .devices()
        .map_err(|e| TetherError::Transport(TransportError::Usb(e.to_string())))?;

    for device in devices.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        let (vid, pid) = (descriptor.vendor_id(), descriptor.product_id());
        if !filters.iter().any(|f| f.matches(vid, pid)) {
            continue;
        }

        let handle = match device.open() {
            Ok(handle) => handle,
            Err(e) => {
                debug!("cannot open candidate {:04x}:{:04x}: {}", vid, pid, e);
                continue;
            }
        };

        match convert_to_accessory(&handle, identity) {
            Ok(()) => {
                info!(
                    "switched {:04x}:{:04x} into accessory mode, waiting for re-enumeration",
                    vid, pid
                );
                return Ok(true);
            }
            Err(e) => {
                // Most Android vendor IDs also cover non-viewer hardware,
                // so a refused handshake is unremarkable
                debug!("candidate {:04x}:{:04x} refused the handshake: {}", vid, pid, e);
            }
        }
    }

    Ok(false)
}
