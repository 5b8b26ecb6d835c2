//! The USB top-level device core.
//!
//! This crate implements the layer of a USB host stack that sits between the
//! host controller driver and the drivers bound to individual interfaces.
//! For every device a host controller enumerates, it reads the descriptor
//! tree over the default control pipe, selects and activates a
//! configuration, publishes the device, and spawns one child device per
//! top-level interface or interface association so that class drivers can
//! bind to them.
//!
//! USB consists of three kinds of participants: the host controller (and its
//! root hub), hubs, and devices. The host controller driver owns the silicon
//! and moves packets; this crate owns everything a device looks like to the
//! rest of the system once the controller has assigned it an address. The
//! controller, the device manager that publishes and binds child devices,
//! and the per-interface children themselves are reached through the traits
//! in [`hci`].
//!
//! The relevant standards are referenced throughout the documentation:
//!
//! - USB2  - [Universal Serial Bus Specification](https://www.usb.org/document-library/usb-20-specification)
//! - USB32 - [Universal Serial Bus 3.2 Specification Revision 1.1](https://usb.org/document-library/usb-32-revision-11-june-2022)

mod completion;
pub mod device;
mod error;
pub mod hci;
pub mod request;
pub mod usb;

pub use crate::device::control::ControlData;
pub use crate::device::interfaces::InterfaceStatus;
pub use crate::device::UsbDevice;
pub use crate::error::{Result, UsbError};
pub use crate::hci::{
    BindProps, BtiHandle, DeviceAddArgs, DeviceManager, DeviceSpeed, DeviceType, HubInterface,
    InterfaceDevice, UsbHci, PROTOCOL_ID_USB,
};
pub use crate::request::{CompleteFn, TransferRequest, TransferResponse};
