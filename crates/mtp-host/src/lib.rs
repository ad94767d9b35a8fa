//! Top-level facade over the MTP host stack: per-device lifecycle
//! orchestration (component group C1–C11 end to end), on-disk config, the
//! quirk database loader, submission bundle shapes, and the extension RPC
//! surface exposed to an external Finder/Files integration.

pub mod config;
pub mod env_overrides;
pub mod error;
pub mod manager;
pub mod quirks;
pub mod rpc;
pub mod submission;
mod transfers;

pub use config::Config;
pub use error::Error;
pub use manager::{DeviceIdentityHint, DeviceManager};
pub use rpc::{ExtensionRpc, ObjectInfo};
