//! Per-device actor exposing the typed MTP operation table (component C6,
//! spec §4.7): device/storage/object queries, chunked read/write
//! (delegating to [`mtp_transfer`]), folder/delete/move, and a decoded
//! event stream.

pub mod actor;
pub mod dataset;
pub mod error;
pub mod event;

pub use actor::Device;
pub use dataset::{DeviceInfo, ObjectInfo, StorageInfo};
pub use error::DeviceError;
pub use event::MtpEvent;
