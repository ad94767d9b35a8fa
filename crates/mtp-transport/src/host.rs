//! The `UsbHostApi` trait: the "bulk-capable USB host API" the spec assumes
//! is provided (§1 Non-goals). `RusbTransport` implements it over `rusb`;
//! `MockUsbHost` (test-only) implements it in memory for the recovery-ladder
//! and probe-algorithm tests (§9 design note: `Transport ∈ {LibUsb, Mock}`).

use crate::types::{InterfaceDescriptorInfo, TransportError};
use std::time::Duration;

pub trait UsbHostApi: Send {
    fn list_interfaces(&mut self) -> Result<Vec<InterfaceDescriptorInfo>, TransportError>;
    fn claim(&mut self, iface_number: u8, detach_kernel_driver: bool) -> Result<(), TransportError>;
    fn release(&mut self, iface_number: u8) -> Result<(), TransportError>;
    fn control_probe(&mut self, timeout: Duration) -> Result<(), TransportError>;
    fn bulk_write(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize, TransportError>;
    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;
    fn interrupt_read(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;
    fn clear_halt(&mut self, endpoint: u8) -> Result<(), TransportError>;
    fn usb_reset(&mut self) -> Result<(), TransportError>;
    /// Closes and reopens the underlying device node, e.g. after a reset.
    fn reopen(&mut self) -> Result<(), TransportError>;
}
