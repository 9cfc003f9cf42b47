//! Supported device identities
//!
//! The tether speaks to phones running in Android accessory (AOAP) mode.
//! The supported hardware is a small closed set of vendor/product ID
//! variants plus whatever extra IDs the configuration supplies.

use common::TetherError;
use std::fmt;

/// A concrete vendor/product ID pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Device variants the tether knows how to stream from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProfile {
    /// Phone in accessory mode (18d1:2d00)
    Accessory,
    /// Phone in accessory mode with ADB enabled (18d1:2d01)
    AccessoryAdb,
    /// An extra ID supplied through configuration
    Custom(UsbId),
}

impl DeviceProfile {
    /// The USB ID this profile matches
    pub fn usb_id(&self) -> UsbId {
        match self {
            DeviceProfile::Accessory => UsbId {
                vendor_id: 0x18D1,
                product_id: 0x2D00,
            },
            DeviceProfile::AccessoryAdb => UsbId {
                vendor_id: 0x18D1,
                product_id: 0x2D01,
            },
            DeviceProfile::Custom(id) => *id,
        }
    }

    /// The built-in accessory-mode profiles
    pub fn builtin() -> [DeviceProfile; 2] {
        [DeviceProfile::Accessory, DeviceProfile::AccessoryAdb]
    }

    /// Filter matching exactly this profile's ID
    pub fn filter(&self) -> UsbIdFilter {
        let id = self.usb_id();
        UsbIdFilter {
            vendor_id: id.vendor_id,
            product_id: Some(id.product_id),
        }
    }
}

/// Vendor IDs assigned to Android handset makers; devices under these
/// vendors are candidates for the accessory-mode switch.
pub const ANDROID_VENDOR_IDS: &[u16] = &[
    0x18D1, // Google
    0x04E8, // Samsung
    0x0BB4, // HTC
    0x1004, // LG
    0x22B8, // Motorola
    0x0FCE, // Sony
    0x12D1, // Huawei
    0x2717, // Xiaomi
    0x2A70, // OnePlus
];

/// True when the vendor ID belongs to a known Android handset maker
pub fn is_android_vendor(vendor_id: u16) -> bool {
    ANDROID_VENDOR_IDS.contains(&vendor_id)
}

/// A VID:PID match pattern, with an optional wildcard product ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbIdFilter {
    pub vendor_id: u16,
    /// `None` matches every product ID under the vendor
    pub product_id: Option<u16>,
}

impl UsbIdFilter {
    /// Parse a filter string of the form `"0x18d1:0x2d00"` or `"0x18d1:*"`
    pub fn parse(filter: &str) -> Result<Self, TetherError> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(TetherError::Config(format!(
                "invalid filter '{}', expected VID:PID (e.g. '0x18d1:0x2d00' or '0x18d1:*')",
                filter
            )));
        }

        let vendor_id = parse_hex_id(parts[0], "VID", filter)?;
        let product_id = if parts[1] == "*" {
            None
        } else {
            Some(parse_hex_id(parts[1], "PID", filter)?)
        };

        Ok(Self {
            vendor_id,
            product_id,
        })
    }

    /// True when the filter matches the given IDs
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id
            && self.product_id.map(|pid| pid == product_id).unwrap_or(true)
    }
}

impl fmt::Display for UsbIdFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.product_id {
            Some(pid) => write!(f, "0x{:04x}:0x{:04x}", self.vendor_id, pid),
            None => write!(f, "0x{:04x}:*", self.vendor_id),
        }
    }
}

fn parse_hex_id(id: &str, name: &str, filter: &str) -> Result<u16, TetherError> {
    let hex = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .ok_or_else(|| {
            TetherError::Config(format!(
                "invalid {} in filter '{}': must start with '0x'",
                name, filter
            ))
        })?;

    if hex.is_empty() || hex.len() > 4 {
        return Err(TetherError::Config(format!(
            "invalid {} in filter '{}': hex part must be 1-4 digits",
            name, filter
        )));
    }

    u16::from_str_radix(hex, 16).map_err(|_| {
        TetherError::Config(format!(
            "invalid {} in filter '{}': not a valid hex number",
            name, filter
        ))
    })
}
