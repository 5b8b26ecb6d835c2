//! A USB top-level device: one per address the host controller assigned.
//!
//! Created when the controller reports a successful enumeration, the device
//! reads the descriptor tree, activates a configuration, publishes itself
//! and spawns per-interface children. Afterwards it mediates the default
//! control pipe and pumps asynchronous transfer completions between the
//! controller and the drivers bound to its children.

use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use log::{error, info, warn};
use smallvec::SmallVec;

use crate::completion::{CallbackMsg, CallbackThread};
use crate::error::{Result, UsbError};
use crate::hci::{
    BindProps, DeviceAddArgs, DeviceManager, DeviceSpeed, UsbHci, PROTOCOL_ID_USB,
};
use crate::request::TransferRequest;
use crate::usb::{ConfigDescriptor, DescriptorKind, DeviceDescriptor};

pub mod control;
pub mod interfaces;
mod protocol;

use self::control::ControlPipe;
use self::interfaces::InterfaceTable;

/// Devices get their children from the first configuration unless this
/// table says otherwise for their vendor/product pair.
struct ConfigOverride {
    vendor: u16,
    product: u16,
    configuration: u8,
}

const CONFIG_OVERRIDES: &[ConfigOverride] = &[
    // Realtek ethernet dongle has its CDC interface on configuration 2.
    ConfigOverride {
        vendor: 0x0bda,
        product: 0x8153,
        configuration: 2,
    },
];

impl std::fmt::Debug for UsbDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbDevice")
            .field("device_id", &self.device_id)
            .field("hub_id", &self.hub_id)
            .field("speed", &self.speed)
            .finish()
    }
}

pub struct UsbDevice {
    hci: Arc<dyn UsbHci>,
    manager: Arc<dyn DeviceManager>,

    /// Id assigned by the host controller.
    device_id: u32,
    /// Id of the hub the device hangs off, or zero for the root hub.
    hub_id: u32,
    speed: DeviceSpeed,

    device_desc: DeviceDescriptor,
    /// One fully-read configuration descriptor blob per configuration, in
    /// descriptor order. Immutable once enumeration finished.
    config_descs: SmallVec<[Box<[u8]>; 1]>,
    current_config_index: AtomicUsize,

    /// Supported string-descriptor language ids, fetched on first use and
    /// stable afterwards so readers never take a lock.
    lang_ids: OnceLock<Box<[u8]>>,

    /// Interface statuses, children and hub bookkeeping, all behind one
    /// mutex.
    interfaces: Mutex<InterfaceTable>,

    ep0: ControlPipe,
    callbacks: CallbackThread,
}

impl UsbDevice {
    /// Enumerate and publish a newly attached device.
    ///
    /// Reads the device descriptor and every configuration blob, picks a
    /// configuration (honoring the override table), issues
    /// `SET_CONFIGURATION`, publishes the non-bindable top-level node and
    /// spawns the per-interface children. Failures before the publish drop
    /// all partial state; child spawn failures afterwards are logged and
    /// tolerated.
    pub fn add(
        hci: Arc<dyn UsbHci>,
        manager: Arc<dyn DeviceManager>,
        device_id: u32,
        hub_id: u32,
        speed: DeviceSpeed,
    ) -> Result<Arc<UsbDevice>> {
        let ep0 = ControlPipe::new(Arc::clone(&hci), device_id);

        let mut raw = [0u8; mem::size_of::<DeviceDescriptor>()];
        ep0.get_descriptor_exact(DescriptorKind::Device, 0, &mut raw)?;
        let device_desc: DeviceDescriptor =
            *plain::from_bytes(&raw).map_err(|_| UsbError::Io)?;

        let mut config_descs: SmallVec<[Box<[u8]>; 1]> = SmallVec::new();
        for config in 0..device_desc.configurations {
            // Read the configuration header first to learn the size of the
            // whole blob, then the blob itself.
            let mut header = [0u8; mem::size_of::<ConfigDescriptor>()];
            ep0.get_descriptor_exact(DescriptorKind::Configuration, config, &mut header)?;
            let header_desc: ConfigDescriptor =
                *plain::from_bytes(&header).map_err(|_| UsbError::Io)?;

            let total_length = header_desc.total_length() as usize;
            if total_length < header.len() {
                error!(
                    "device {}: configuration {} reports wTotalLength {}",
                    device_id, config, total_length
                );
                return Err(UsbError::Io);
            }
            let mut blob = vec![0u8; total_length];
            ep0.get_descriptor_exact(DescriptorKind::Configuration, config, &mut blob)?;
            config_descs.push(blob.into_boxed_slice());
        }

        let mut configuration = 1u8;
        for entry in CONFIG_OVERRIDES {
            if entry.vendor == u16::from_le(device_desc.vendor)
                && entry.product == u16::from_le(device_desc.product)
            {
                configuration = entry.configuration;
                break;
            }
        }
        if configuration == 0 || configuration as usize > config_descs.len() {
            error!(
                "device {}: configuration {} out of range ({} available)",
                device_id,
                configuration,
                config_descs.len()
            );
            return Err(UsbError::Internal);
        }
        let config_index = configuration as usize - 1;

        let chosen: ConfigDescriptor = *plain::from_bytes(&config_descs[config_index])
            .map_err(|_| UsbError::Io)?;
        ep0.set_configuration(chosen.configuration_value)?;

        info!(
            "found USB device ({:04x}:{:04x}, USB {:x}.{:x}) config {}",
            u16::from_le(device_desc.vendor),
            u16::from_le(device_desc.product),
            device_desc.major_usb_vers(),
            device_desc.minor_usb_vers(),
            configuration
        );

        let dev = Arc::new(UsbDevice {
            hci,
            manager: Arc::clone(&manager),
            device_id,
            hub_id,
            speed,
            device_desc,
            config_descs,
            current_config_index: AtomicUsize::new(config_index),
            lang_ids: OnceLock::new(),
            interfaces: Mutex::new(InterfaceTable::new(chosen.interfaces as usize)),
            ep0,
            // The callback worker runs before the publish below: publishing
            // may recursively bind drivers that immediately queue transfers.
            callbacks: CallbackThread::start(device_id),
        });

        manager.add_device(DeviceAddArgs {
            name: format!("{:03}", device_id),
            protocol_id: PROTOCOL_ID_USB,
            props: BindProps {
                vendor: u16::from_le(device_desc.vendor),
                product: u16::from_le(device_desc.product),
                class: device_desc.class,
                sub_class: device_desc.sub_class,
                protocol: device_desc.protocol,
            },
            non_bindable: true,
        })?;

        if let Err(err) = dev.add_interfaces(dev.active_config_blob()) {
            warn!(
                "device {}: not all interfaces came up: {}",
                device_id, err
            );
        }

        Ok(dev)
    }

    /// Activate the configuration with the given `bConfigurationValue`:
    /// issue the control transfer, then tear down every child, resize the
    /// status table and spawn children for the new configuration.
    pub fn set_configuration(&self, config: u8) -> Result<()> {
        let mut selected = None;
        for (index, blob) in self.config_descs.iter().enumerate() {
            let desc: ConfigDescriptor =
                *plain::from_bytes(blob).map_err(|_| UsbError::Io)?;
            if desc.configuration_value == config {
                selected = Some((index, desc.interfaces as usize));
                break;
            }
        }
        let Some((config_index, interfaces)) = selected else {
            return Err(UsbError::InvalidArgs);
        };

        self.ep0.set_configuration(config)?;
        self.current_config_index
            .store(config_index, Ordering::SeqCst);

        // Tear down and recreate the subdevices for our interfaces.
        self.remove_interfaces();
        self.reset_interface_statuses(interfaces);
        self.add_interfaces(self.active_config_blob())
    }

    /// Queue an asynchronous transfer on behalf of a client.
    ///
    /// The client's completion callback is parked on the request and
    /// replaced with a trampoline into the device's callback worker, so the
    /// client is never called on the controller's completion context.
    pub fn request_queue(&self, mut req: TransferRequest) {
        req.device_id = self.device_id;
        req.saved_callback = req.callback.take();

        let completed = self.callbacks.sender();
        req.callback = Some(Box::new(move |mut req: TransferRequest| {
            req.callback = req.saved_callback.take();
            if completed.send(CallbackMsg::Complete(req)).is_err() {
                warn!("request completed after its device was released");
            }
        }));

        self.hci.request_queue(req);
    }

    /// Remove the children and then the device itself from the device
    /// manager.
    pub fn unbind(&self) {
        self.remove_interfaces();
        self.manager.remove_device(self.device_id);
    }

    /// Stop the callback worker. Once this returns, no client completion
    /// callback will run again.
    pub fn release(&self) {
        self.callbacks.stop();
    }

    pub(crate) fn active_config_blob(&self) -> &[u8] {
        &self.config_descs[self.current_config_index.load(Ordering::SeqCst)][..]
    }

    pub(crate) fn config_blob_for(&self, config: u8) -> Option<&[u8]> {
        for blob in &self.config_descs {
            let desc: ConfigDescriptor = match plain::from_bytes(blob) {
                Ok(desc) => *desc,
                Err(_) => continue,
            };
            if desc.configuration_value == config {
                return Some(&blob[..]);
            }
        }
        None
    }
}
