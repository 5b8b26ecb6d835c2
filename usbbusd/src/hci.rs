//! Interfaces to the collaborators surrounding the device core: the host
//! controller driver above it, the device manager that publishes nodes, and
//! the per-interface children spawned below it.

use std::sync::Arc;

use crate::error::Result;
use crate::request::TransferRequest;
use crate::usb::DeviceDescriptor;

/// Protocol id the top-level device node is published under.
pub const PROTOCOL_ID_USB: u32 = 0x0055_5342;

/// Link speed negotiated for a device, as reported by the host controller.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceSpeed {
    Undefined = 0,
    Full = 1,
    Low = 2,
    High = 3,
    Super = 4,
}

/// What kind of node a USB protocol handle points at.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceType {
    Device = 0,
    Interface = 1,
}

/// Bus transaction initiator handle: the capability transfer buffers are
/// allocated against so the controller may DMA them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BtiHandle(pub u64);

/// The host controller driver, keyed on the device ids it assigned during
/// enumeration. Transfer submission is asynchronous: the controller takes
/// ownership of the request and hands it back through the request's
/// completion callback, possibly on its own interrupt context.
pub trait UsbHci: Send + Sync {
    fn request_queue(&self, req: TransferRequest);

    /// Force-complete every transfer pending on the endpoint. The flushed
    /// requests still travel their normal completion path, carrying a
    /// cancellation status.
    fn cancel_all(&self, device_id: u32, ep_address: u8) -> Result<()>;

    fn reset_endpoint(&self, device_id: u32, ep_address: u8) -> Result<()>;

    fn max_transfer_size(&self, device_id: u32, ep_address: u8) -> usize;

    fn current_frame(&self) -> u64;

    fn bti_handle(&self) -> BtiHandle;
}

/// Properties the device manager matches drivers against.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BindProps {
    pub vendor: u16,
    pub product: u16,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
}

/// Arguments for publishing the top-level device node.
#[derive(Clone, Debug)]
pub struct DeviceAddArgs {
    pub name: String,
    pub protocol_id: u32,
    pub props: BindProps,
    /// The top-level node of a device is not a binding surface; drivers bind
    /// to the interface children instead.
    pub non_bindable: bool,
}

/// The device manager. Publishing may bind drivers recursively before it
/// returns, and those drivers may immediately call back into the device.
pub trait DeviceManager: Send + Sync {
    fn add_device(&self, args: DeviceAddArgs) -> Result<()>;

    fn remove_device(&self, device_id: u32);

    /// Publish a child device for one top-level interface. `descriptors` is
    /// the interface descriptor together with its alternate settings and
    /// class-specific descriptors, copied out of the configuration blob.
    fn add_interface(
        &self,
        device_desc: &DeviceDescriptor,
        descriptors: Box<[u8]>,
    ) -> Result<Arc<dyn InterfaceDevice>>;

    /// Publish a child device for an interface association. `descriptors`
    /// starts at the association descriptor and covers every grouped
    /// interface.
    fn add_interface_association(
        &self,
        device_desc: &DeviceDescriptor,
        descriptors: Box<[u8]>,
    ) -> Result<Arc<dyn InterfaceDevice>>;
}

/// A published per-interface child device.
pub trait InterfaceDevice: Send + Sync {
    /// Whether this child owns the given interface number. Association
    /// children own every interface in their group.
    fn contains_interface(&self, interface_number: u8) -> bool;

    fn set_alt_setting(&self, interface_number: u8, alt_setting: u8) -> Result<()>;

    /// Request removal of the child from the device manager.
    fn remove(&self);
}

/// Callbacks into the hub driver bound to a hub device.
pub trait HubInterface: Send + Sync {
    fn reset_port(&self, port: u32) -> Result<()>;
}
