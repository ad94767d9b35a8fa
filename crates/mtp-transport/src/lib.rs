//! USB interface probing, claim, endpoint I/O and the recovery ladder.
//!
//! This crate treats the operating system's USB stack as already provided
//! (spec §1 Non-goals say so explicitly) and wraps it behind [`UsbHostApi`],
//! a small trait implemented both by [`rusb_impl::RusbTransport`] for real
//! hardware and by [`mock::MockUsbHost`] for tests.

pub mod host;
pub mod mock;
pub mod probe;
pub mod rusb_impl;
pub mod types;

pub use host::UsbHostApi;
pub use mock::MockUsbHost;
pub use probe::{order_candidates, score_interface, Transport};
pub use rusb_impl::RusbTransport;
pub use types::{
    BoundInterface, Direction, EndpointDescriptorInfo, EndpointTransferType, InterfaceDescriptorInfo, IoDeadline,
    TransportError,
};
