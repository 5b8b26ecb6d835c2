//! In-process collaborators for driving the device core end to end: a fake
//! host controller serving scripted descriptors and a fake device manager
//! recording everything that gets published.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use usbbusd::{
    BtiHandle, DeviceAddArgs, DeviceManager, HubInterface, InterfaceDevice, Result,
    TransferRequest, UsbError, UsbHci,
};

pub const FAKE_BTI: BtiHandle = BtiHandle(0xb71);
pub const FAKE_FRAME: u64 = 0x1234;
pub const FAKE_MAX_TRANSFER: usize = 65536;

// Descriptor type codes used when scripting blobs.
const DT_DEVICE: u8 = 1;
const DT_CONFIG: u8 = 2;
const DT_STRING: u8 = 3;
const DT_INTERFACE: u8 = 4;
const DT_ENDPOINT: u8 = 5;
const DT_ASSOCIATION: u8 = 11;

const REQ_GET_DESCRIPTOR: u8 = 0x06;
const REQ_SET_CONFIGURATION: u8 = 0x09;

pub fn device_desc_bytes(vendor: u16, product: u16, configurations: u8) -> Vec<u8> {
    let v = vendor.to_le_bytes();
    let p = product.to_le_bytes();
    vec![
        18, DT_DEVICE, 0x00, 0x02, 0, 0, 0, 64, v[0], v[1], p[0], p[1], 0x00, 0x01, 1, 2, 3,
        configurations,
    ]
}

pub fn interface_desc(number: u8, alt: u8, class: u8) -> Vec<u8> {
    vec![9, DT_INTERFACE, number, alt, 1, class, 0, 0, 0]
}

pub fn endpoint_desc(address: u8) -> Vec<u8> {
    vec![7, DT_ENDPOINT, address, 0x03, 8, 0, 10]
}

pub fn association_desc(first: u8, count: u8) -> Vec<u8> {
    vec![8, DT_ASSOCIATION, first, count, 0x02, 0x06, 0, 0]
}

/// A full configuration blob: header with computed `wTotalLength`, then the
/// given descriptors.
pub fn config_blob(value: u8, interfaces: u8, parts: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = parts.concat();
    let total = (9 + body.len()) as u16;
    let mut blob = vec![
        9,
        DT_CONFIG,
        total as u8,
        (total >> 8) as u8,
        interfaces,
        value,
        0,
        0x80,
        50,
    ];
    blob.extend_from_slice(&body);
    blob
}

pub fn string_desc_utf16(text: &str) -> Vec<u8> {
    let mut desc = vec![0, DT_STRING];
    for unit in text.encode_utf16() {
        desc.extend_from_slice(&unit.to_le_bytes());
    }
    desc[0] = desc.len() as u8;
    desc
}

pub fn lang_table(ids: &[u16]) -> Vec<u8> {
    let mut desc = vec![0, DT_STRING];
    for id in ids {
        desc.extend_from_slice(&id.to_le_bytes());
    }
    desc[0] = desc.len() as u8;
    desc
}

#[derive(Default)]
struct HciState {
    device_desc: Vec<u8>,
    config_blobs: Vec<Vec<u8>>,
    lang_table: Vec<u8>,
    strings: Vec<(u8, u16, Vec<u8>)>,
    set_configurations: Vec<u8>,
    cancel_calls: Vec<(u32, u8)>,
    reset_calls: Vec<(u32, u8)>,
    lang_table_fetches: u32,
    drop_control: bool,
    parked: Vec<TransferRequest>,
}

pub struct FakeHci {
    state: Mutex<HciState>,
}

impl FakeHci {
    pub fn new(device_desc: Vec<u8>, config_blobs: Vec<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HciState {
                device_desc,
                config_blobs,
                ..HciState::default()
            }),
        })
    }

    pub fn with_strings(self: Arc<Self>, langs: &[u16], strings: &[(u8, u16, &str)]) -> Arc<Self> {
        {
            let mut state = self.state.lock().unwrap();
            state.lang_table = lang_table(langs);
            state.strings = strings
                .iter()
                .map(|&(id, lang, text)| (id, lang, string_desc_utf16(text)))
                .collect();
        }
        self
    }

    /// Park control requests instead of completing them, until `cancel_all`
    /// flushes them.
    pub fn set_drop_control(&self, drop: bool) {
        self.state.lock().unwrap().drop_control = drop;
    }

    pub fn set_configurations(&self) -> Vec<u8> {
        self.state.lock().unwrap().set_configurations.clone()
    }

    pub fn cancel_calls(&self) -> Vec<(u32, u8)> {
        self.state.lock().unwrap().cancel_calls.clone()
    }

    pub fn reset_calls(&self) -> Vec<(u32, u8)> {
        self.state.lock().unwrap().reset_calls.clone()
    }

    pub fn lang_table_fetches(&self) -> u32 {
        self.state.lock().unwrap().lang_table_fetches
    }

    fn serve_control(&self, req: &mut TransferRequest) -> Result<usize> {
        let setup = req.setup;
        let request = setup.request;
        let value = setup.value;
        let lang = setup.index;

        let mut state = self.state.lock().unwrap();
        match request {
            REQ_GET_DESCRIPTOR => {
                let kind = (value >> 8) as u8;
                let index = value as u8;
                let bytes = match kind {
                    DT_DEVICE => state.device_desc.clone(),
                    DT_CONFIG => state
                        .config_blobs
                        .get(index as usize)
                        .cloned()
                        .ok_or(UsbError::Io)?,
                    DT_STRING => {
                        if index == 0 {
                            state.lang_table_fetches += 1;
                            state.lang_table.clone()
                        } else {
                            state
                                .strings
                                .iter()
                                .find(|&&(id, l, _)| id == index && l == lang)
                                .map(|(_, _, bytes)| bytes.clone())
                                .ok_or(UsbError::Io)?
                        }
                    }
                    _ => return Err(UsbError::NotSupported),
                };
                drop(state);
                Ok(req.copy_to(&bytes, 0))
            }
            REQ_SET_CONFIGURATION => {
                state.set_configurations.push(value as u8);
                Ok(0)
            }
            _ => Ok(0),
        }
    }
}

impl UsbHci for FakeHci {
    fn request_queue(&self, mut req: TransferRequest) {
        if req.ep_address == 0 {
            {
                let mut state = self.state.lock().unwrap();
                if state.drop_control {
                    state.parked.push(req);
                    return;
                }
            }
            let result = self.serve_control(&mut req);
            match result {
                Ok(actual) => req.complete(Ok(()), actual),
                Err(err) => req.complete(Err(err), 0),
            }
        } else {
            // Bulk and interrupt transfers echo back successfully.
            let actual = req.length;
            req.complete(Ok(()), actual);
        }
    }

    fn cancel_all(&self, device_id: u32, ep_address: u8) -> Result<()> {
        let flushed: Vec<TransferRequest> = {
            let mut state = self.state.lock().unwrap();
            state.cancel_calls.push((device_id, ep_address));
            let parked = std::mem::take(&mut state.parked);
            let (flushed, kept) = parked
                .into_iter()
                .partition(|req| req.device_id == device_id && req.ep_address == ep_address);
            state.parked = kept;
            flushed
        };
        for req in flushed {
            req.complete(Err(UsbError::Cancelled), 0);
        }
        Ok(())
    }

    fn reset_endpoint(&self, device_id: u32, ep_address: u8) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .reset_calls
            .push((device_id, ep_address));
        Ok(())
    }

    fn max_transfer_size(&self, _device_id: u32, _ep_address: u8) -> usize {
        FAKE_MAX_TRANSFER
    }

    fn current_frame(&self) -> u64 {
        FAKE_FRAME
    }

    fn bti_handle(&self) -> BtiHandle {
        FAKE_BTI
    }
}

/// Scan a descriptor range for the numbers of its top-level interfaces.
fn top_level_interfaces(descriptors: &[u8]) -> Vec<u8> {
    let mut numbers = Vec::new();
    let mut offset = 0;
    while offset + 2 <= descriptors.len() {
        let length = descriptors[offset] as usize;
        if length == 0 || offset + length > descriptors.len() {
            break;
        }
        if descriptors[offset + 1] == DT_INTERFACE && length >= 4 && descriptors[offset + 3] == 0 {
            numbers.push(descriptors[offset + 2]);
        }
        offset += length;
    }
    numbers
}

pub struct FakeChild {
    pub association: bool,
    pub descriptors: Box<[u8]>,
    pub interface_numbers: Vec<u8>,
    pub removed: AtomicBool,
    pub alt_settings: Mutex<Vec<(u8, u8)>>,
}

impl FakeChild {
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }
}

impl InterfaceDevice for FakeChild {
    fn contains_interface(&self, interface_number: u8) -> bool {
        self.interface_numbers.contains(&interface_number)
    }

    fn set_alt_setting(&self, interface_number: u8, alt_setting: u8) -> Result<()> {
        self.alt_settings
            .lock()
            .unwrap()
            .push((interface_number, alt_setting));
        Ok(())
    }

    fn remove(&self) {
        self.removed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeManager {
    pub devices: Mutex<Vec<DeviceAddArgs>>,
    pub removed_devices: Mutex<Vec<u32>>,
    pub created: Mutex<Vec<Arc<FakeChild>>>,
    /// Interface numbers whose spawn should fail, for partial-walk tests.
    pub fail_interfaces: Mutex<Vec<u8>>,
}

impl FakeManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn live_children(&self) -> Vec<Arc<FakeChild>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|child| !child.is_removed())
            .cloned()
            .collect()
    }

    fn spawn(&self, descriptors: Box<[u8]>, association: bool) -> Result<Arc<FakeChild>> {
        let interface_numbers = top_level_interfaces(&descriptors);
        if let Some(first) = interface_numbers.first() {
            if self.fail_interfaces.lock().unwrap().contains(first) {
                return Err(UsbError::Io);
            }
        }
        let child = Arc::new(FakeChild {
            association,
            descriptors,
            interface_numbers,
            removed: AtomicBool::new(false),
            alt_settings: Mutex::new(Vec::new()),
        });
        self.created.lock().unwrap().push(Arc::clone(&child));
        Ok(child)
    }
}

impl DeviceManager for FakeManager {
    fn add_device(&self, args: DeviceAddArgs) -> Result<()> {
        self.devices.lock().unwrap().push(args);
        Ok(())
    }

    fn remove_device(&self, device_id: u32) {
        self.removed_devices.lock().unwrap().push(device_id);
    }

    fn add_interface(
        &self,
        _device_desc: &usbbusd::usb::DeviceDescriptor,
        descriptors: Box<[u8]>,
    ) -> Result<Arc<dyn InterfaceDevice>> {
        Ok(self.spawn(descriptors, false)?)
    }

    fn add_interface_association(
        &self,
        _device_desc: &usbbusd::usb::DeviceDescriptor,
        descriptors: Box<[u8]>,
    ) -> Result<Arc<dyn InterfaceDevice>> {
        Ok(self.spawn(descriptors, true)?)
    }
}

#[derive(Default)]
pub struct FakeHub {
    pub reset_ports: Mutex<Vec<u32>>,
}

impl HubInterface for FakeHub {
    fn reset_port(&self, port: u32) -> Result<()> {
        self.reset_ports.lock().unwrap().push(port);
        Ok(())
    }
}
