//! Transfer request objects handed between clients, the device core and the
//! host controller driver.

use std::sync::Mutex;

use crate::error::UsbError;
use crate::hci::BtiHandle;
use crate::usb::Setup;

/// Completion callback. The request travels into the callback by value, so
/// whoever completes a request gives up ownership of it.
pub type CompleteFn = Box<dyn FnOnce(TransferRequest) + Send>;

/// Final status and byte count of a finished transfer.
#[derive(Clone, Copy, Debug)]
pub struct TransferResponse {
    pub status: Result<(), UsbError>,
    pub actual: usize,
}

impl Default for TransferResponse {
    fn default() -> Self {
        Self {
            status: Ok(()),
            actual: 0,
        }
    }
}

/// An asynchronous USB transfer.
///
/// The request owns its data buffer for its whole life. Submitting it to
/// the host controller transfers ownership of the request; it comes back
/// through [`TransferRequest::complete`], which invokes the installed
/// callback with the final response filled in.
pub struct TransferRequest {
    pub device_id: u32,
    pub ep_address: u8,
    pub bti: BtiHandle,
    pub setup: Setup,
    /// Requested transfer length; the buffer is sized to it.
    pub length: usize,
    pub response: TransferResponse,
    buffer: Vec<u8>,
    pub(crate) callback: Option<CompleteFn>,
    /// The client's own callback, parked here while the device's trampoline
    /// occupies `callback`, and restored before the client sees the request
    /// again.
    pub(crate) saved_callback: Option<CompleteFn>,
}

impl TransferRequest {
    /// Allocate a request with a zeroed data buffer of `data_size` bytes,
    /// targeting the given endpoint address.
    pub fn alloc(bti: BtiHandle, data_size: usize, ep_address: u8) -> Self {
        Self {
            device_id: 0,
            ep_address,
            bti,
            setup: Setup::default(),
            length: data_size,
            response: TransferResponse::default(),
            buffer: vec![0; data_size],
            callback: None,
            saved_callback: None,
        }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Copy `data` into the request buffer at `offset`, returning the number
    /// of bytes copied.
    pub fn copy_to(&mut self, data: &[u8], offset: usize) -> usize {
        let Some(dst) = self.buffer.get_mut(offset..) else {
            return 0;
        };
        let count = data.len().min(dst.len());
        dst[..count].copy_from_slice(&data[..count]);
        count
    }

    /// Copy out of the request buffer at `offset` into `data`, returning the
    /// number of bytes copied.
    pub fn copy_from(&self, data: &mut [u8], offset: usize) -> usize {
        let Some(src) = self.buffer.get(offset..) else {
            return 0;
        };
        let count = data.len().min(src.len());
        data[..count].copy_from_slice(&src[..count]);
        count
    }

    /// Install the completion callback invoked when the transfer finishes.
    pub fn set_callback(&mut self, callback: CompleteFn) {
        self.callback = Some(callback);
    }

    /// Finish the transfer: record the response and hand the request to the
    /// installed callback. A request without a callback is dropped.
    pub fn complete(mut self, status: Result<(), UsbError>, actual: usize) {
        self.response = TransferResponse { status, actual };
        if let Some(callback) = self.callback.take() {
            callback(self);
        }
    }
}

/// Free list of reusable requests, keyed on buffer length. The control path
/// parks its zero-length requests here instead of reallocating per transfer.
#[derive(Default)]
pub struct RequestPool {
    reqs: Mutex<Vec<TransferRequest>>,
}

impl RequestPool {
    pub fn get(&self, length: usize) -> Option<TransferRequest> {
        let mut reqs = self.reqs.lock().unwrap();
        let pos = reqs.iter().position(|req| req.length == length)?;
        Some(reqs.swap_remove(pos))
    }

    pub fn put(&self, mut req: TransferRequest) {
        req.response = TransferResponse::default();
        req.callback = None;
        req.saved_callback = None;
        self.reqs.lock().unwrap().push(req);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_recycles_by_length() {
        let pool = RequestPool::default();
        pool.put(TransferRequest::alloc(BtiHandle(0), 0, 0));
        pool.put(TransferRequest::alloc(BtiHandle(0), 64, 1));

        assert!(pool.get(8).is_none());
        let req = pool.get(0).expect("zero-length request pooled");
        assert_eq!(req.length, 0);
        assert!(pool.get(0).is_none());
        assert!(pool.get(64).is_some());
    }

    #[test]
    fn copy_helpers_clamp_to_buffer() {
        let mut req = TransferRequest::alloc(BtiHandle(0), 4, 0);
        assert_eq!(req.copy_to(&[1, 2, 3, 4, 5, 6], 0), 4);
        assert_eq!(req.buffer(), &[1, 2, 3, 4]);

        let mut out = [0u8; 8];
        assert_eq!(req.copy_from(&mut out, 2), 2);
        assert_eq!(&out[..2], &[3, 4]);
        assert_eq!(req.copy_to(&[9], 10), 0);
    }
}
