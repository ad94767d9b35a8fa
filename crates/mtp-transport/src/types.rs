//! Interface/endpoint descriptors and transport errors (spec §3.1, §4.4).

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointTransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptorInfo {
    pub address: u8,
    pub direction: Direction,
    pub transfer_type: EndpointTransferType,
    pub max_packet_size: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptorInfo {
    pub number: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<EndpointDescriptorInfo>,
}

impl InterfaceDescriptorInfo {
    pub fn bulk_in(&self) -> Option<u8> {
        self.endpoints
            .iter()
            .find(|e| e.direction == Direction::In && e.transfer_type == EndpointTransferType::Bulk)
            .map(|e| e.address)
    }

    pub fn bulk_out(&self) -> Option<u8> {
        self.endpoints
            .iter()
            .find(|e| e.direction == Direction::Out && e.transfer_type == EndpointTransferType::Bulk)
            .map(|e| e.address)
    }

    pub fn interrupt_in(&self) -> Option<u8> {
        self.endpoints
            .iter()
            .find(|e| e.direction == Direction::In && e.transfer_type == EndpointTransferType::Interrupt)
            .map(|e| e.address)
    }

    pub fn max_packet_size(&self, address: u8) -> Option<u16> {
        self.endpoints.iter().find(|e| e.address == address).map(|e| e.max_packet_size)
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no device present")]
    NoDevice,
    #[error("operation timed out")]
    Timeout,
    #[error("device reported busy")]
    Busy,
    #[error("access denied by host USB stack")]
    AccessDenied,
    #[error("i/o error: {0}")]
    Io(String),
    #[error("sent {sent} of {requested} bytes before timeout")]
    ShortWrite { sent: usize, requested: usize },
    #[error("no suitable MTP interface found among {candidates} candidate(s)")]
    NoSuitableInterface { candidates: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct IoDeadline {
    pub timeout: Duration,
}

impl IoDeadline {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// The bound MTP interface: claimed interface number plus its three
/// endpoints (interrupt-in is optional).
#[derive(Debug, Clone, Copy)]
pub struct BoundInterface {
    pub number: u8,
    pub bulk_in: u8,
    pub bulk_out: u8,
    pub interrupt_in: Option<u8>,
    pub bulk_in_max_packet: u16,
    pub bulk_out_max_packet: u16,
}
