//! `DeviceId` derivation (spec §3.1, §8.1: "∀ distinct signals with
//! differing usb-serials on the same (vid,pid): resolve_identity(a).domainId
//! ≠ resolve_identity(b).domainId").

/// Raw signals a caller has in hand when a device is (re-)discovered.
/// Any field may be absent; `derive_domain_id` falls through the priority
/// order of spec §3.1 as each signal becomes available.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    pub usb_serial: Option<String>,
    pub mtp_serial: Option<String>,
    pub vid: u16,
    pub pid: u16,
    pub manufacturer: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub domain_id: String,
    pub display_name: String,
    pub last_seen_at: i64,
}

/// Priority order from spec §3.1: USB iSerialNumber, then MTP-level serial,
/// then a type hash over (vid, pid, manufacturer, model).
pub fn derive_domain_id(signals: &Signals) -> String {
    if let Some(serial) = non_empty(&signals.usb_serial) {
        return format!("usb:{serial}");
    }
    if let Some(serial) = non_empty(&signals.mtp_serial) {
        return format!("mtp:{serial}");
    }
    format!("type:{:04x}:{:04x}:{}:{}", signals.vid, signals.pid, signals.manufacturer, signals.model)
}

/// A domain id derived without a real serial number is ephemeral: it can
/// later be migrated once a stable serial is learned (spec §3.1 "upgrade
/// step").
pub fn is_ephemeral(domain_id: &str) -> bool {
    domain_id.starts_with("type:")
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.is_empty())
}

pub fn display_name(signals: &Signals) -> String {
    let name = format!("{} {}", signals.manufacturer.trim(), signals.model.trim());
    let trimmed = name.trim();
    if trimmed.is_empty() {
        "Unknown device".to_string()
    } else {
        trimmed.to_string()
    }
}
