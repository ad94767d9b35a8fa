//! Operation, response, and event code enumerations used by the core.
//!
//! Numeric values are the PTP/MTP standard codes. Vendor-specific codes are
//! not enumerated here; callers that need them work with the raw `u16` on
//! `Container`.

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum OperationCode {
    GetDeviceInfo = 0x1001,
    OpenSession = 0x1002,
    CloseSession = 0x1003,
    GetStorageIDs = 0x1004,
    GetStorageInfo = 0x1005,
    GetNumObjects = 0x1006,
    GetObjectHandles = 0x1007,
    GetObjectInfo = 0x1008,
    GetObject = 0x1009,
    DeleteObject = 0x100B,
    SendObjectInfo = 0x100C,
    SendObject = 0x100D,
    GetDevicePropDesc = 0x1014,
    GetDevicePropValue = 0x1015,
    MoveObject = 0x1019,
    GetPartialObject = 0x101B,
    GetObjectPropsSupported = 0x9801,
    GetObjectPropDesc = 0x9802,
    GetObjectPropValue = 0x9803,
    GetObjectPropList = 0x9805,
    GetObjectReferences = 0x9810,
    SendPartialObject = 0x9806,
    GetPartialObject64 = 0x95C1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum ResponseCode {
    Ok = 0x2001,
    GeneralError = 0x2002,
    DeviceBusy = 0x2003,
    InvalidStorageID = 0x2005,
    InvalidObjectHandle = 0x2006,
    StorageFull = 0x200B,
    ObjectWriteProtected = 0x200C,
    StoreNotAvailable = 0x2013,
    OperationNotSupported = 0x2019,
    InvalidParameter = 0x201D,
    SessionAlreadyOpen = 0x201E,
    TransactionCancelled = 0x201F,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum EventCode {
    CancelTransaction = 0x4001,
    ObjectAdded = 0x4002,
    ObjectRemoved = 0x4003,
    StoreAdded = 0x4004,
    StoreRemoved = 0x4005,
    DeviceInfoChanged = 0x4008,
    ObjectInfoChanged = 0x4007,
    StoreFull = 0x400A,
    DeviceReset = 0x400D,
    StorageInfoChanged = 0x400C,
}

/// Maps a response code to the semantic error kind named in spec §4.2.
/// Unknown codes other than `Ok` are treated as a generic protocol error by
/// the caller (`mtp-session`/`mtp-device`), which still carries the raw
/// code through for diagnostics.
pub fn is_ok(code: u16) -> bool {
    code == ResponseCode::Ok as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_codes_round_trip_through_primitive() {
        let raw: u16 = ResponseCode::DeviceBusy.into();
        assert_eq!(raw, 0x2003);
        assert_eq!(ResponseCode::try_from(raw), Ok(ResponseCode::DeviceBusy));
    }

    #[test]
    fn ok_detection() {
        assert!(is_ok(0x2001));
        assert!(!is_ok(0x2003));
    }
}
