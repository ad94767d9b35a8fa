//! Data model for device fingerprints, quirk entries, hooks and the merged
//! effective-tuning result (component C2, spec §3.4–§3.6).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fingerprint {
    pub vid: u16,
    pub pid: u16,
    pub bcd_device: Option<u16>,
    pub iface_class: Option<u8>,
    pub iface_subclass: Option<u8>,
    pub iface_protocol: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tuning {
    pub max_chunk_bytes: Option<u32>,
    pub io_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub inactivity_timeout_ms: Option<u64>,
    pub overall_deadline_ms: Option<u64>,
    pub stabilize_ms: Option<u64>,
    pub reset_on_open: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    PostOpenUsb,
    PostClaimInterface,
    PostOpenSession,
    BeforeGetDeviceInfo,
    BeforeGetStorageIds,
    BeforeGetObjectHandles,
    BeforeTransfer,
    AfterTransfer,
    OnDeviceBusy,
    OnDetach,
}

impl HookPhase {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "postOpenUSB" => Self::PostOpenUsb,
            "postClaimInterface" => Self::PostClaimInterface,
            "postOpenSession" => Self::PostOpenSession,
            "beforeGetDeviceInfo" => Self::BeforeGetDeviceInfo,
            "beforeGetStorageIDs" => Self::BeforeGetStorageIds,
            "beforeGetObjectHandles" => Self::BeforeGetObjectHandles,
            "beforeTransfer" => Self::BeforeTransfer,
            "afterTransfer" => Self::AfterTransfer,
            "onDeviceBusy" => Self::OnDeviceBusy,
            "onDetach" => Self::OnDetach,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusyBackoff {
    pub retries: u32,
    pub base_ms: u64,
    pub jitter_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hook {
    pub phase: HookPhase,
    pub delay_ms: Option<u64>,
    pub busy_backoff: Option<BusyBackoff>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuirkFlags {
    pub write_to_subfolder_only: bool,
    pub requires_kernel_detach: bool,
    pub disable_event_pump: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuirkStatus {
    Proposed,
    Verified,
    Promoted,
}

impl QuirkStatus {
    /// Unknown status strings map to `Proposed` (spec §3.4/§9 Open Question).
    pub fn parse(s: &str) -> Self {
        match s {
            "verified" => Self::Verified,
            "promoted" => Self::Promoted,
            _ => Self::Proposed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default)]
pub struct Provenance {
    pub submitted_by: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeviceQuirk {
    pub id: String,
    pub device_name: Option<String>,
    pub category: Option<String>,
    pub fingerprint: Fingerprint,
    pub tuning: Tuning,
    pub hooks: Vec<Hook>,
    pub operations: HashMap<String, bool>,
    pub flags: QuirkFlags,
    pub status: QuirkStatus,
    pub confidence: Option<Confidence>,
    pub provenance: Option<Provenance>,
}

/// Source that last wrote a given `EffectiveTuning` field, for diagnostics
/// (spec §4.3 `BuildPolicy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    Defaults,
    Class,
    Capability,
    Learned,
    Quirk,
    User,
}

#[derive(Debug, Clone, Default)]
pub struct BuildPolicy {
    pub sources: HashMap<&'static str, FieldSource>,
}

impl BuildPolicy {
    fn set(&mut self, field: &'static str, source: FieldSource) {
        self.sources.insert(field, source);
    }
}

/// Flattened, clamped result of `QuirkDatabase::build_effective` (spec §3.6).
#[derive(Debug, Clone)]
pub struct EffectiveTuning {
    pub max_chunk_bytes: u32,
    pub io_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub inactivity_timeout_ms: u64,
    pub overall_deadline_ms: u64,
    pub stabilize_ms: u64,
    pub reset_on_open: bool,
    pub operations: HashMap<String, bool>,
    pub hooks: Vec<Hook>,
    pub flags: QuirkFlags,
    pub policy: BuildPolicy,
}

pub const MIN_CHUNK_BYTES: u32 = 128 * 1024;
pub const MAX_CHUNK_BYTES: u32 = 16 * 1024 * 1024;
pub const MIN_DURATION_MS: u64 = 1_000;
pub const MAX_IO_TIMEOUT_MS: u64 = 60_000;

/// Results of the runtime capability probe (component C5), fed into layer 3
/// of the effective-tuning builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub partial_read: bool,
    pub partial_read64: bool,
    pub partial_write: bool,
    pub supports_events: bool,
    pub prefer_prop_list: bool,
}

impl Capabilities {
    pub fn as_operations(&self) -> HashMap<String, bool> {
        let mut m = HashMap::new();
        m.insert("supportsPartialRead".to_string(), self.partial_read);
        m.insert("supportsPartialRead64".to_string(), self.partial_read64);
        m.insert("supportsPartialWrite".to_string(), self.partial_write);
        m.insert("supportsEvents".to_string(), self.supports_events);
        m.insert("preferPropList".to_string(), self.prefer_prop_list);
        m
    }
}

/// Per-device observed steady values (component C2 layer 4, spec §4.3).
#[derive(Debug, Clone, Copy, Default)]
pub struct LearnedProfile {
    pub max_chunk_bytes: Option<u32>,
    pub io_timeout_ms: Option<u64>,
    pub stabilize_ms: Option<u64>,
}

pub(crate) fn mark(policy: &mut BuildPolicy, field: &'static str, source: FieldSource) {
    policy.set(field, source);
}
