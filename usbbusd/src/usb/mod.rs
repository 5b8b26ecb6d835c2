pub use self::config::ConfigDescriptor;
pub use self::device::DeviceDescriptor;
pub use self::interface::{InterfaceAssocDescriptor, InterfaceDescriptor};
pub use self::setup::Setup;

/// Descriptor type codes (USB32 Table 9-6).
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DescriptorKind {
    None = 0,
    Device = 1,
    Configuration = 2,
    String = 3,
    Interface = 4,
    Endpoint = 5,
    DeviceQualifier = 6,
    OtherSpeedConfiguration = 7,
    InterfacePower = 8,
    OnTheGo = 9,
    InterfaceAssociation = 11,
}

// bmRequestType direction, type and recipient fields (USB32 Table 9-4).
pub const DIR_OUT: u8 = 0b0000_0000;
pub const DIR_IN: u8 = 0b1000_0000;
pub const DIR_MASK: u8 = 0b1000_0000;

pub const TYPE_STANDARD: u8 = 0 << 5;
pub const TYPE_CLASS: u8 = 1 << 5;
pub const TYPE_VENDOR: u8 = 2 << 5;

pub const RECIP_DEVICE: u8 = 0;
pub const RECIP_INTERFACE: u8 = 1;
pub const RECIP_ENDPOINT: u8 = 2;
pub const RECIP_OTHER: u8 = 3;

/// Every descriptor opens with a length byte and a type byte; walking a
/// configuration blob is a matter of hopping from header to header.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct DescriptorHeader {
    pub length: u8,
    pub kind: u8,
}

unsafe impl plain::Plain for DescriptorHeader {}

mod config;
mod device;
mod interface;
mod setup;
