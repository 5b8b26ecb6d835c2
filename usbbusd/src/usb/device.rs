//! The "Device" USB descriptor (USB32 9.6.1).

/// A USB device descriptor.
///
/// Provides the information that applies globally to the device and all of
/// its configurations. A device has exactly one. Field offsets follow USB32
/// Table 9-11; multi-byte fields are little-endian on the wire, so decode
/// them with [`u16::from_le`].
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub kind: u8,
    /// The USB standard version in binary-coded decimal (bcdUSB).
    pub usb: u16,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
    /// Maximum packet size for endpoint 0.
    pub packet_size: u8,
    pub vendor: u16,
    pub product: u16,
    /// Device release number in binary-coded decimal (bcdDevice).
    pub release: u16,
    pub manufacturer_str: u8,
    pub product_str: u8,
    pub serial_str: u8,
    /// The number of configurations offered by the device (bNumConfigurations).
    pub configurations: u8,
}

unsafe impl plain::Plain for DeviceDescriptor {}

impl DeviceDescriptor {
    pub fn major_usb_vers(&self) -> u8 {
        ((u16::from_le(self.usb) >> 8) & 0xFF) as u8
    }

    pub fn minor_usb_vers(&self) -> u8 {
        (u16::from_le(self.usb) & 0xFF) as u8
    }
}
