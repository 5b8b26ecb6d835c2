//! Synchronous control transfers on the default control pipe.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::{error, warn};

use crate::error::{Result, UsbError};
use crate::hci::UsbHci;
use crate::request::{RequestPool, TransferRequest};
use crate::usb::{self, DescriptorKind, Setup};

/// Data stage of a control transfer, fixing both direction and buffer.
pub enum ControlData<'a> {
    /// Device to host; the response is copied into the buffer on success.
    In(&'a mut [u8]),
    /// Host to device; the buffer is copied into the request up front.
    Out(&'a [u8]),
    /// No data stage.
    NoData,
}

impl ControlData<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::In(buf) => buf.len(),
            Self::Out(buf) => buf.len(),
            Self::NoData => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parking spot for the single in-flight control request. The submitting
/// thread blocks here until the controller hands the request back.
#[derive(Default)]
struct CompletionSlot {
    req: Mutex<Option<TransferRequest>>,
    cond: Condvar,
}

impl CompletionSlot {
    fn put(&self, req: TransferRequest) {
        let mut slot = self.req.lock().unwrap();
        *slot = Some(req);
        self.cond.notify_one();
    }

    /// Wait until the request arrives.
    fn recv(&self) -> TransferRequest {
        let mut slot = self.req.lock().unwrap();
        loop {
            match slot.take() {
                Some(req) => return req,
                None => slot = self.cond.wait(slot).unwrap(),
            }
        }
    }

    /// Wait until the request arrives or `timeout` elapses.
    fn recv_timeout(&self, timeout: Duration) -> Option<TransferRequest> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.req.lock().unwrap();
        loop {
            if let Some(req) = slot.take() {
                return Some(req);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self.cond.wait_timeout(slot, deadline - now).unwrap();
            slot = guard;
        }
    }
}

/// The device's endpoint-0 bridge: request/response over the asynchronous
/// controller interface, with timeout-driven cancellation.
pub(crate) struct ControlPipe {
    hci: Arc<dyn UsbHci>,
    device_id: u32,
    free_reqs: RequestPool,
}

impl ControlPipe {
    pub fn new(hci: Arc<dyn UsbHci>, device_id: u32) -> Self {
        Self {
            hci,
            device_id,
            free_reqs: RequestPool::default(),
        }
    }

    /// Issue one control transfer and wait for it to finish, returning the
    /// number of bytes actually transferred in the data stage.
    ///
    /// On timeout, every transfer pending on endpoint 0 is cancelled and the
    /// forced completion is awaited before returning `TimedOut`, so the
    /// controller no longer references the request once this returns.
    ///
    /// This submits to the controller directly rather than through the
    /// device's queue shim: the caller is already blocked waiting, and
    /// internal enumeration code calls this while holding setup-critical
    /// state that the callback worker must never depend on.
    pub fn control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        mut data: ControlData<'_>,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        let length = data.len();
        if u16::try_from(length).is_err() {
            return Err(UsbError::InvalidArgs);
        }

        let mut req = if length == 0 {
            self.free_reqs.get(0)
        } else {
            None
        }
        .unwrap_or_else(|| TransferRequest::alloc(self.hci.bti_handle(), length, 0));

        req.device_id = self.device_id;
        req.setup = Setup::new(request_type, request, value, index, length as u16);

        let out = (request_type & usb::DIR_MASK) == usb::DIR_OUT;
        if let ControlData::Out(buf) = &data {
            req.copy_to(buf, 0);
        }

        let slot = Arc::new(CompletionSlot::default());
        let produced = Arc::clone(&slot);
        req.set_callback(Box::new(move |req| produced.put(req)));
        self.hci.request_queue(req);

        let completed = match timeout {
            Some(timeout) => slot.recv_timeout(timeout),
            None => Some(slot.recv()),
        };
        let req = match completed {
            Some(req) => req,
            None => {
                // Cancel and drain, so the request's buffer cannot be
                // touched by the controller after we return.
                warn!(
                    "control transfer timed out on device {}, cancelling ep 0",
                    self.device_id
                );
                self.hci.cancel_all(self.device_id, 0)?;
                let req = slot.recv();
                self.recycle(req);
                return Err(UsbError::TimedOut);
            }
        };

        let response = req.response;
        if response.status.is_ok() && !out {
            if let ControlData::In(ref mut buf) = data {
                let count = response.actual.min(buf.len());
                req.copy_from(&mut buf[..count], 0);
            }
        }
        self.recycle(req);

        response.status.map(|()| response.actual)
    }

    fn recycle(&self, req: TransferRequest) {
        if req.length == 0 {
            self.free_reqs.put(req);
        }
    }

    /// `GET_DESCRIPTOR` into `buf`, returning the byte count the device
    /// answered with.
    pub fn get_descriptor(
        &self,
        kind: DescriptorKind,
        index: u8,
        language: u16,
        buf: &mut [u8],
    ) -> Result<usize> {
        let length = buf.len() as u16;
        let setup = Setup::get_descriptor(kind, index, language, length);
        self.control(
            setup.kind,
            setup.request,
            setup.value,
            setup.index,
            ControlData::In(buf),
            None,
        )
    }

    /// `GET_DESCRIPTOR` that must fill the whole buffer; a short answer is
    /// an I/O error.
    pub fn get_descriptor_exact(
        &self,
        kind: DescriptorKind,
        index: u8,
        buf: &mut [u8],
    ) -> Result<()> {
        let actual = self.get_descriptor(kind, index, 0, buf)?;
        if actual < buf.len() {
            error!(
                "short descriptor read on device {}: {} of {} bytes",
                self.device_id,
                actual,
                buf.len()
            );
            return Err(UsbError::Io);
        }
        Ok(())
    }

    /// `SET_CONFIGURATION` with the given configuration value.
    pub fn set_configuration(&self, value: u8) -> Result<()> {
        let setup = Setup::set_configuration(value);
        self.control(
            usb::DIR_OUT | usb::TYPE_STANDARD | usb::RECIP_DEVICE,
            setup.request,
            setup.value,
            setup.index,
            ControlData::NoData,
            None,
        )
        .map(|_| ())
    }
}
