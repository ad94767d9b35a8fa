//! Session open/close sequencing (C4) and capability probing (C5).
//!
//! Grounded on CUAir-rust-ptp's `open_session`/`close_session`/`command`
//! transaction loop (`other_examples/11b3ec88_CUAir-rust-ptp__src-lib.rs.rs`),
//! adapted to read through [`mtp_transport::Transport`] and to apply the
//! hook/stabilize/busy-backoff sequencing of spec §4.5/§4.6.

pub mod capability;
pub mod error;
pub mod session;
pub mod transaction;

pub use capability::probe_capabilities;
pub use error::SessionError;
pub use session::Session;
pub use transaction::{execute, TransactionOutcome};
