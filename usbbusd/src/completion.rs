//! The per-device callback worker.
//!
//! The host controller invokes its completion callbacks on its own event
//! context. Calling a client's completion callback from there is unsafe:
//! clients routinely resubmit from inside the callback, which would reenter
//! the controller driver. Completed requests are instead queued to a
//! dedicated worker thread, one per device so completions keep their
//! per-device FIFO order.

use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use log::warn;

use crate::request::TransferRequest;

pub(crate) enum CallbackMsg {
    Complete(TransferRequest),
    Stop,
}

pub(crate) struct CallbackThread {
    tx: Sender<CallbackMsg>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CallbackThread {
    /// Spawn the worker. It runs until [`CallbackThread::stop`] or drop.
    pub fn start(device_id: u32) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = thread::Builder::new()
            .name(format!("usb-dev-{}-callback", device_id))
            .spawn(move || Self::run(rx))
            .expect("usbbusd: failed to spawn callback thread");

        Self {
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    fn run(rx: Receiver<CallbackMsg>) {
        loop {
            match rx.recv() {
                Ok(CallbackMsg::Complete(req)) => {
                    // The producer restored the client callback before
                    // enqueueing; replay the response through it.
                    let response = req.response;
                    req.complete(response.status, response.actual);
                }
                Ok(CallbackMsg::Stop) | Err(_) => break,
            }
        }
    }

    /// Producer side, cloned into each request's trampoline.
    pub fn sender(&self) -> Sender<CallbackMsg> {
        self.tx.clone()
    }

    /// Stop the worker and wait for it to finish. After this returns no
    /// client callback will run again. Idempotent.
    pub fn stop(&self) {
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if self.tx.send(CallbackMsg::Stop).is_err() {
                warn!("callback worker exited before stop");
            }
            let _ = handle.join();
        }
    }
}

impl Drop for CallbackThread {
    fn drop(&mut self) {
        self.stop();
    }
}
