//! PTP/MTP wire codec: little-endian primitives (C0) and container framing
//! and operation/response/event codes (C1).

pub mod codes;
pub mod container;
pub mod endian;

pub use codes::{EventCode, OperationCode, ResponseCode};
pub use container::{parse, Container, ContainerKind, CodecError};
pub use endian::{decode_ptp_string, encode_ptp_string, PtpStringError};
