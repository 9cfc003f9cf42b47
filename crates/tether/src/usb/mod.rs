//! USB device discovery and access

pub mod accessory;
pub mod device;
pub mod profile;

pub use accessory::{AccessoryIdentity, convert_first_candidate, convert_to_accessory};
pub use device::{DeviceInfo, TetherDevice, find_device, list_candidate_devices};
pub use profile::{ANDROID_VENDOR_IDS, DeviceProfile, UsbId, UsbIdFilter, is_android_vendor};
