//! The device protocol surface exposed to drivers bound below this node.

use std::time::Duration;

use crate::error::{Result, UsbError};
use crate::hci::{BtiHandle, DeviceSpeed, DeviceType};
use crate::request::TransferRequest;
use crate::usb::{ConfigDescriptor, DescriptorKind, DeviceDescriptor};

use super::control::ControlData;
use super::UsbDevice;

/// Longest answer a string descriptor can carry: one length byte worth.
const MAX_STRING_DESC: usize = 255;

impl UsbDevice {
    /// This node represents a whole device; its children represent
    /// interfaces.
    pub fn device_type(&self) -> DeviceType {
        DeviceType::Device
    }

    pub fn speed(&self) -> DeviceSpeed {
        self.speed
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn hub_id(&self) -> u32 {
        self.hub_id
    }

    pub fn device_descriptor(&self) -> DeviceDescriptor {
        self.device_desc
    }

    /// The descriptor blob of the configuration with the given
    /// `bConfigurationValue`.
    pub fn config_descriptor(&self, config: u8) -> Result<&[u8]> {
        self.config_blob_for(config).ok_or(UsbError::InvalidArgs)
    }

    /// Decoded `wTotalLength` of the configuration with the given value.
    pub fn config_descriptor_size(&self, config: u8) -> Result<u16> {
        let blob = self.config_descriptor(config)?;
        let desc: ConfigDescriptor = *plain::from_bytes(blob).map_err(|_| UsbError::Io)?;
        Ok(desc.total_length())
    }

    /// The active configuration's descriptor blob.
    pub fn active_descriptors(&self) -> &[u8] {
        self.active_config_blob()
    }

    pub fn active_descriptors_size(&self) -> u16 {
        self.active_descriptors().len() as u16
    }

    /// Copy the active configuration's descriptors into `buf`. The buffer
    /// must hold the whole blob; nothing is written otherwise.
    pub fn read_active_descriptors(&self, buf: &mut [u8]) -> Result<usize> {
        let blob = self.active_descriptors();
        let out = buf.get_mut(..blob.len()).ok_or(UsbError::BufferTooSmall)?;
        out.copy_from_slice(blob);
        Ok(blob.len())
    }

    /// `bConfigurationValue` of the active configuration.
    pub fn configuration_value(&self) -> u8 {
        // The blob was validated during enumeration.
        self.active_config_blob()[5]
    }

    /// Issue a control transfer on endpoint 0. See
    /// [`ControlData`] for the data-stage directions.
    pub fn control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: ControlData<'_>,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        self.ep0
            .control(request_type, request, value, index, data, timeout)
    }

    /// Read a string descriptor into `buf` as UTF-8, returning the number
    /// of bytes written.
    ///
    /// `lang_id` is negotiated: if the device does not offer the requested
    /// language, the first supported one is used, and the id actually used
    /// is written back. The supported-language table is fetched once per
    /// device and cached. The output is truncated at a character boundary
    /// if `buf` is short.
    pub fn get_string_descriptor(
        &self,
        desc_id: u8,
        lang_id: &mut u16,
        buf: &mut [u8],
    ) -> Result<usize> {
        let table = self.supported_langs()?;
        let ids: Vec<u16> = table[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if !ids.contains(lang_id) {
            *lang_id = ids[0];
        }

        let mut raw = [0u8; MAX_STRING_DESC];
        let actual =
            self.ep0
                .get_descriptor(DescriptorKind::String, desc_id, *lang_id, &mut raw)?;
        let end = (raw[0] as usize).min(actual);
        if end < 2 {
            return Err(UsbError::Io);
        }

        // The payload is UTF-16LE; transcode into the caller's buffer,
        // stopping at the last character that fits whole.
        let units: Vec<u16> = raw[2..end]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let mut written = 0;
        for ch in char::decode_utf16(units).map(|ch| ch.unwrap_or(char::REPLACEMENT_CHARACTER)) {
            let len = ch.len_utf8();
            if written + len > buf.len() {
                break;
            }
            ch.encode_utf8(&mut buf[written..written + len]);
            written += len;
        }
        Ok(written)
    }

    /// The language-id table (string descriptor zero), fetched on first use.
    fn supported_langs(&self) -> Result<&[u8]> {
        if let Some(table) = self.lang_ids.get() {
            return Ok(table);
        }

        let mut raw = [0u8; MAX_STRING_DESC];
        let actual = self
            .ep0
            .get_descriptor(DescriptorKind::String, 0, 0, &mut raw)?;
        let end = (raw[0] as usize).min(actual);
        if end < 4 {
            // Header with no language ids at all.
            return Err(UsbError::Io);
        }
        // First writer wins; a racing fetch just re-read the same table.
        let _ = self.lang_ids.set(raw[..end].into());
        Ok(self.lang_ids.get().unwrap())
    }

    /// Frame counter passthrough.
    pub fn current_frame(&self) -> u64 {
        self.hci.current_frame()
    }

    pub fn reset_endpoint(&self, ep_address: u8) -> Result<()> {
        self.hci.reset_endpoint(self.device_id, ep_address)
    }

    /// Cancel every transfer pending on the endpoint; the flushed requests
    /// complete through the callback worker with a cancellation status.
    pub fn cancel_all(&self, ep_address: u8) -> Result<()> {
        self.hci.cancel_all(self.device_id, ep_address)
    }

    pub fn max_transfer_size(&self, ep_address: u8) -> usize {
        self.hci.max_transfer_size(self.device_id, ep_address)
    }

    /// Allocate a transfer request against this device's bus transaction
    /// initiator.
    pub fn request_alloc(&self, data_size: usize, ep_address: u8) -> TransferRequest {
        TransferRequest::alloc(self.bti_handle(), data_size, ep_address)
    }

    pub fn bti_handle(&self) -> BtiHandle {
        self.hci.bti_handle()
    }

    /// Claiming by descriptor is a composite-child operation; the top-level
    /// node does not implement it.
    pub fn claim_interface_descriptors(&self, _descriptors: &[u8]) -> Result<()> {
        Err(UsbError::NotSupported)
    }
}
