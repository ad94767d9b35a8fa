//! Device event decoding (spec §4.7 event stream). Events arrive as
//! `Event`-kind containers on the interrupt endpoint; each carries up to
//! three `u32` parameters instead of a data phase.

use mtp_codec::container::{Container, ContainerKind};
use mtp_codec::EventCode;

/// A decoded device event, matching spec §4.7's event enum exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MtpEvent {
    ObjectAdded(u32),
    ObjectRemoved(u32),
    ObjectInfoChanged(u32),
    StorageAdded(u32),
    StorageRemoved(u32),
    StorageInfoChanged(u32),
    DeviceInfoChanged,
    DeviceReset,
    Unknown { code: u16, params: Vec<u32> },
}

/// Decodes an `Event`-kind container into an [`MtpEvent`]. Returns `None`
/// for non-event containers (the event pump should never see these, but
/// decoding stays total rather than panicking on a malformed read).
pub fn decode_event(container: &Container) -> Option<MtpEvent> {
    if container.kind != ContainerKind::Event {
        return None;
    }
    let p0 = container.params.first().copied().unwrap_or(0);
    let event = match EventCode::try_from(container.code) {
        Ok(EventCode::ObjectAdded) => MtpEvent::ObjectAdded(p0),
        Ok(EventCode::ObjectRemoved) => MtpEvent::ObjectRemoved(p0),
        Ok(EventCode::ObjectInfoChanged) => MtpEvent::ObjectInfoChanged(p0),
        Ok(EventCode::StoreAdded) => MtpEvent::StorageAdded(p0),
        Ok(EventCode::StoreRemoved) => MtpEvent::StorageRemoved(p0),
        Ok(EventCode::StorageInfoChanged) => MtpEvent::StorageInfoChanged(p0),
        Ok(EventCode::DeviceInfoChanged) => MtpEvent::DeviceInfoChanged,
        Ok(EventCode::DeviceReset) => MtpEvent::DeviceReset,
        _ => MtpEvent::Unknown { code: container.code, params: container.params.clone() },
    };
    Some(event)
}
