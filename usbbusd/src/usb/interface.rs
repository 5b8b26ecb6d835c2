use plain::Plain;

/// An interface descriptor (USB32 9.6.5). `alternate_setting == 0` marks a
/// top-level interface; alternates with the same `number` follow it in the
/// configuration blob.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct InterfaceDescriptor {
    pub length: u8,
    pub kind: u8,
    pub number: u8,
    pub alternate_setting: u8,
    pub endpoints: u8,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
    pub interface_str: u8,
}

unsafe impl Plain for InterfaceDescriptor {}

/// An interface association descriptor (USB32 9.6.4), grouping
/// `interface_count` consecutive interfaces into one function.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct InterfaceAssocDescriptor {
    pub length: u8,
    pub kind: u8,
    pub first_interface: u8,
    pub interface_count: u8,
    pub function_class: u8,
    pub function_sub_class: u8,
    pub function_protocol: u8,
    pub function_str: u8,
}

unsafe impl Plain for InterfaceAssocDescriptor {}
