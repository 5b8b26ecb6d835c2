//! Interface bookkeeping for a configured device: the per-interface status
//! table, the children set, and the walk over a configuration blob that
//! spawns one child per top-level interface or association.

use std::mem;
use std::sync::Arc;

use log::warn;
use smallvec::SmallVec;

use crate::error::{Result, UsbError};
use crate::hci::{HubInterface, InterfaceDevice};
use crate::usb::{
    DescriptorHeader, DescriptorKind, InterfaceAssocDescriptor, InterfaceDescriptor,
};

use super::UsbDevice;

/// Arbitration state of one interface number in the active configuration.
///
/// Child creation by the configuration walk races with explicit claims from
/// composite siblings, because publishing a child may bind drivers
/// recursively before it returns. Two states are not enough: a claim must be
/// able to tell "a child already exists and has to be torn down first" apart
/// from "nothing was ever created".
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum InterfaceStatus {
    /// No child exists and nobody has claimed the interface.
    #[default]
    Available,
    /// A sibling interface owns it; no independent child may exist.
    Claimed,
    /// A child device has been published for it.
    ChildDevice,
}

/// Everything guarded by the device's interface mutex: the status table
/// sized to the active configuration's `bNumInterfaces`, the children set,
/// and the hub marker.
#[derive(Default)]
pub(crate) struct InterfaceTable {
    statuses: Box<[InterfaceStatus]>,
    children: SmallVec<[Arc<dyn InterfaceDevice>; 2]>,
    is_hub: bool,
    hub_intf: Option<Arc<dyn HubInterface>>,
}

impl InterfaceTable {
    pub fn new(interfaces: usize) -> Self {
        Self {
            statuses: vec![InterfaceStatus::default(); interfaces].into_boxed_slice(),
            ..Self::default()
        }
    }

    /// Zero the table for a new configuration; every entry becomes
    /// [`InterfaceStatus::Available`].
    fn reset(&mut self, interfaces: usize) {
        self.statuses = vec![InterfaceStatus::default(); interfaces].into_boxed_slice();
    }

    /// Remove the child owning `interface_number`, if one can be found.
    fn remove_child_by_id(&mut self, interface_number: u8) -> bool {
        let Some(pos) = self
            .children
            .iter()
            .position(|child| child.contains_interface(interface_number))
        else {
            return false;
        };
        let child = self.children.remove(pos);
        child.remove();
        true
    }
}

/// One child-worthy range of a configuration blob.
#[derive(Debug, Eq, PartialEq)]
enum ConfigEntry<'a> {
    /// An interface association descriptor together with the interfaces it
    /// groups.
    Association(&'a [u8]),
    /// A top-level interface together with its alternate settings and
    /// class-specific descriptors.
    Interface { number: u8, bytes: &'a [u8] },
}

/// Iterator over the child-worthy ranges of a configuration blob, starting
/// right after the configuration header. Descriptors that belong to no
/// range (endpoints of a skipped interface, stray class descriptors) are
/// passed over by their `bLength`.
struct ConfigWalker<'a> {
    blob: &'a [u8],
    offset: usize,
}

impl<'a> ConfigWalker<'a> {
    fn new(blob: &'a [u8]) -> Self {
        // The configuration header's own length byte tells us where the
        // interface descriptors start.
        let offset = blob.first().copied().unwrap_or(0) as usize;
        let offset = if offset == 0 { blob.len() } else { offset };
        Self { blob, offset }
    }

    /// Descriptor header at `offset`, unless the blob ends there or the
    /// header is malformed. A zero length or a length reaching past the end
    /// of the blob terminates the walk.
    fn header_at(&self, offset: usize) -> Option<(usize, u8)> {
        let header: DescriptorHeader = self.descriptor_at(offset)?;
        let length = header.length as usize;
        if length == 0 || offset + length > self.blob.len() {
            return None;
        }
        Some((length, header.kind))
    }

    fn descriptor_at<T: plain::Plain + Copy>(&self, offset: usize) -> Option<T> {
        plain::from_bytes(self.blob.get(offset..)?).ok().copied()
    }

    /// Find where the association starting at `offset` ends: after
    /// `interface_count` top-level interfaces (and their trailing
    /// descriptors), at the next association, or at the end of the blob.
    fn association_end(&self, offset: usize, length: usize, mut interface_count: u8) -> usize {
        let mut next = offset + length;
        while let Some((length, kind)) = self.header_at(next) {
            if kind == DescriptorKind::InterfaceAssociation as u8 {
                break;
            }
            if kind == DescriptorKind::Interface as u8 {
                if let Some(desc) = self.descriptor_at::<InterfaceDescriptor>(next) {
                    if desc.alternate_setting == 0 {
                        if interface_count == 0 {
                            break;
                        }
                        interface_count -= 1;
                    }
                }
            }
            next += length;
        }
        next
    }

    /// Find where the top-level interface starting at `offset` ends: at the
    /// next top-level interface, or at the end of the blob. Alternate
    /// settings stay inside the range.
    fn interface_end(&self, offset: usize, length: usize) -> usize {
        let mut next = offset + length;
        while let Some((length, kind)) = self.header_at(next) {
            if kind == DescriptorKind::Interface as u8 {
                if let Some(desc) = self.descriptor_at::<InterfaceDescriptor>(next) {
                    if desc.alternate_setting == 0 {
                        break;
                    }
                }
            }
            next += length;
        }
        next
    }
}

impl<'a> Iterator for ConfigWalker<'a> {
    type Item = ConfigEntry<'a>;

    fn next(&mut self) -> Option<ConfigEntry<'a>> {
        loop {
            let (length, kind) = self.header_at(self.offset)?;

            if kind == DescriptorKind::InterfaceAssociation as u8 {
                let Some(desc) = self.descriptor_at::<InterfaceAssocDescriptor>(self.offset) else {
                    self.offset += length;
                    continue;
                };
                if desc.interface_count == 0 {
                    self.offset += length;
                    continue;
                }
                let end = self.association_end(self.offset, length, desc.interface_count);
                let bytes = &self.blob[self.offset..end];
                self.offset = end;
                return Some(ConfigEntry::Association(bytes));
            }

            if kind == DescriptorKind::Interface as u8 {
                if let Some(desc) = self.descriptor_at::<InterfaceDescriptor>(self.offset) {
                    if desc.alternate_setting == 0 {
                        let end = self.interface_end(self.offset, length);
                        let bytes = &self.blob[self.offset..end];
                        self.offset = end;
                        return Some(ConfigEntry::Interface {
                            number: desc.number,
                            bytes,
                        });
                    }
                }
            }

            self.offset += length;
        }
    }
}

impl UsbDevice {
    /// Walk the configuration blob and publish a child for every top-level
    /// interface still available and every interface association.
    ///
    /// Spawn failures are remembered but do not stop the walk, so a device
    /// with one broken function still gets children for the rest.
    pub(crate) fn add_interfaces(&self, config: &[u8]) -> Result<()> {
        let device_desc = self.device_desc;
        let mut result = Ok(());

        for entry in ConfigWalker::new(config) {
            match entry {
                ConfigEntry::Association(bytes) => {
                    match self
                        .manager
                        .add_interface_association(&device_desc, bytes.into())
                    {
                        Ok(child) => {
                            self.interfaces.lock().unwrap().children.push(child);
                        }
                        Err(err) => {
                            warn!(
                                "device {}: adding interface association failed: {}",
                                self.device_id, err
                            );
                            result = Err(err);
                        }
                    }
                }
                ConfigEntry::Interface { number, bytes } => {
                    let index = number as usize;
                    // Status check only; the mutex is not held across the
                    // publish, which may recursively bind drivers.
                    let status = {
                        let table = self.interfaces.lock().unwrap();
                        match table.statuses.get(index) {
                            Some(status) => *status,
                            None => {
                                warn!(
                                    "device {}: interface {} outside the status table",
                                    self.device_id, number
                                );
                                result = Err(UsbError::BadState);
                                continue;
                            }
                        }
                    };
                    if status != InterfaceStatus::Available {
                        continue;
                    }

                    match self.manager.add_interface(&device_desc, bytes.into()) {
                        Ok(child) => {
                            // A sibling may have claimed the interface while
                            // the child was being published; if so the fresh
                            // child loses and is torn down again.
                            let mut table = self.interfaces.lock().unwrap();
                            if table.statuses[index] == InterfaceStatus::Claimed {
                                child.remove();
                            } else {
                                table.statuses[index] = InterfaceStatus::ChildDevice;
                                table.children.push(child);
                            }
                        }
                        Err(err) => {
                            warn!(
                                "device {}: adding interface {} failed: {}",
                                self.device_id, number, err
                            );
                            result = Err(err);
                        }
                    }
                }
            }
        }

        result
    }

    /// Mark `interface_id` as owned by a composite sibling, tearing down the
    /// auto-created child if one exists.
    ///
    /// Fails with `AlreadyBound` if another sibling holds the claim, and
    /// with `BadState` if a child should exist but cannot be found.
    pub fn claim_interface(&self, interface_id: u8) -> Result<()> {
        let mut table = self.interfaces.lock().unwrap();
        let index = interface_id as usize;
        let status = *table
            .statuses
            .get(index)
            .ok_or(UsbError::InvalidArgs)?;

        match status {
            InterfaceStatus::Claimed => return Err(UsbError::AlreadyBound),
            InterfaceStatus::ChildDevice => {
                if !table.remove_child_by_id(interface_id) {
                    return Err(UsbError::BadState);
                }
            }
            InterfaceStatus::Available => {}
        }
        table.statuses[index] = InterfaceStatus::Claimed;
        Ok(())
    }

    /// Select an alternate setting, delegating to the child that owns the
    /// interface.
    pub fn set_interface(&self, interface_number: u8, alt_setting: u8) -> Result<()> {
        let child = {
            let table = self.interfaces.lock().unwrap();
            table
                .children
                .iter()
                .find(|child| child.contains_interface(interface_number))
                .cloned()
        };
        match child {
            Some(child) => child.set_alt_setting(interface_number, alt_setting),
            None => Err(UsbError::InvalidArgs),
        }
    }

    /// Tear down every child device. The children are taken out under the
    /// interface mutex, but removal itself runs without it held.
    pub(crate) fn remove_interfaces(&self) {
        let children = {
            let mut table = self.interfaces.lock().unwrap();
            mem::take(&mut table.children)
        };
        for child in children {
            child.remove();
        }
    }

    /// Reset the status table for a configuration with `interfaces`
    /// interfaces. All entries become available.
    pub(crate) fn reset_interface_statuses(&self, interfaces: usize) {
        self.interfaces.lock().unwrap().reset(interfaces);
    }

    /// Status of one interface number in the active configuration.
    pub fn interface_status(&self, interface_id: u8) -> Option<InterfaceStatus> {
        let table = self.interfaces.lock().unwrap();
        table.statuses.get(interface_id as usize).copied()
    }

    /// Number of currently published children.
    pub fn child_count(&self) -> usize {
        self.interfaces.lock().unwrap().children.len()
    }

    /// Mark the device as a hub, remembering the hub driver's callback
    /// interface.
    pub fn set_hub_interface(&self, hub_intf: Option<Arc<dyn HubInterface>>) {
        let mut table = self.interfaces.lock().unwrap();
        table.is_hub = true;
        if hub_intf.is_some() {
            table.hub_intf = hub_intf;
        }
    }

    pub fn is_hub(&self) -> bool {
        self.interfaces.lock().unwrap().is_hub
    }

    /// Ask the hub driver bound to this device to reset one of its ports.
    pub fn reset_hub_port(&self, port: u32) -> Result<()> {
        let hub_intf = {
            let table = self.interfaces.lock().unwrap();
            table.hub_intf.clone()
        };
        match hub_intf {
            Some(hub) => hub.reset_port(port),
            None => Err(UsbError::BadState),
        }
    }
}
