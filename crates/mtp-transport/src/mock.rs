//! In-memory `UsbHostApi` used by this crate's tests and by `mtp-session`'s
//! and `mtp-device`'s tests (§9 design note: `Transport ∈ {LibUsb, Mock}`).

use crate::host::UsbHostApi;
use crate::types::{InterfaceDescriptorInfo, TransportError};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Default)]
pub struct MockUsbHost {
    pub interfaces: Vec<InterfaceDescriptorInfo>,
    pub control_probe_results: VecDeque<Result<(), TransportError>>,
    pub bulk_write_results: VecDeque<Result<usize, TransportError>>,
    pub bulk_read_results: VecDeque<Result<usize, TransportError>>,
    /// When non-empty, takes priority over `bulk_read_results` and copies
    /// the given bytes into the caller's buffer — lets tests script exact
    /// container bytes rather than just transfer lengths.
    pub bulk_read_data: VecDeque<Result<Vec<u8>, TransportError>>,
    pub interrupt_read_results: VecDeque<Result<usize, TransportError>>,
    /// Same priority convention as `bulk_read_data`: scripts exact event
    /// container bytes for the interrupt endpoint.
    pub interrupt_read_data: VecDeque<Result<Vec<u8>, TransportError>>,
    pub claim_results: VecDeque<Result<(), TransportError>>,
    pub clear_halt_calls: usize,
    pub usb_reset_calls: usize,
    pub reopen_calls: usize,
    pub claim_calls: Vec<u8>,
    pub release_calls: Vec<u8>,
    pub bulk_write_calls: Vec<usize>,
}

impl MockUsbHost {
    pub fn new(interfaces: Vec<InterfaceDescriptorInfo>) -> Self {
        Self { interfaces, ..Default::default() }
    }
}

impl UsbHostApi for MockUsbHost {
    fn list_interfaces(&mut self) -> Result<Vec<InterfaceDescriptorInfo>, TransportError> {
        Ok(self.interfaces.clone())
    }

    fn claim(&mut self, iface_number: u8, _detach_kernel_driver: bool) -> Result<(), TransportError> {
        self.claim_calls.push(iface_number);
        self.claim_results.pop_front().unwrap_or(Ok(()))
    }

    fn release(&mut self, iface_number: u8) -> Result<(), TransportError> {
        self.release_calls.push(iface_number);
        Ok(())
    }

    fn control_probe(&mut self, _timeout: Duration) -> Result<(), TransportError> {
        self.control_probe_results.pop_front().unwrap_or(Ok(()))
    }

    fn bulk_write(&mut self, _endpoint: u8, data: &[u8], _timeout: Duration) -> Result<usize, TransportError> {
        self.bulk_write_calls.push(data.len());
        self.bulk_write_results.pop_front().unwrap_or(Ok(data.len()))
    }

    fn bulk_read(&mut self, _endpoint: u8, buf: &mut [u8], _timeout: Duration) -> Result<usize, TransportError> {
        if let Some(scripted) = self.bulk_read_data.pop_front() {
            let bytes = scripted?;
            let n = bytes.len().min(buf.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            return Ok(n);
        }
        self.bulk_read_results.pop_front().unwrap_or(Ok(buf.len()))
    }

    fn interrupt_read(&mut self, _endpoint: u8, buf: &mut [u8], _timeout: Duration) -> Result<usize, TransportError> {
        if let Some(scripted) = self.interrupt_read_data.pop_front() {
            let bytes = scripted?;
            let n = bytes.len().min(buf.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            return Ok(n);
        }
        self.interrupt_read_results.pop_front().unwrap_or(Ok(buf.len()))
    }

    fn clear_halt(&mut self, _endpoint: u8) -> Result<(), TransportError> {
        self.clear_halt_calls += 1;
        Ok(())
    }

    fn usb_reset(&mut self) -> Result<(), TransportError> {
        self.usb_reset_calls += 1;
        Ok(())
    }

    fn reopen(&mut self) -> Result<(), TransportError> {
        self.reopen_calls += 1;
        Ok(())
    }
}
