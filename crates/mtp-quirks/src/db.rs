//! Fingerprint scoring and the layered effective-tuning builder (spec §4.3).

use crate::types::{
    mark, BuildPolicy, Capabilities, DeviceQuirk, EffectiveTuning, FieldSource, Fingerprint,
    LearnedProfile, QuirkFlags, Tuning, MAX_CHUNK_BYTES, MAX_IO_TIMEOUT_MS, MIN_CHUNK_BYTES,
    MIN_DURATION_MS,
};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct QuirkDatabase {
    entries: Vec<DeviceQuirk>,
}

fn score(fp: &Fingerprint, entry: &Fingerprint) -> Option<u32> {
    if entry.vid != fp.vid || entry.pid != fp.pid {
        return None;
    }
    let mut s = 10;
    if let Some(bcd) = entry.bcd_device {
        if Some(bcd) != fp.bcd_device {
            return None;
        }
        s += 3;
    }
    if let Some(class) = entry.iface_class {
        if Some(class) != fp.iface_class {
            return None;
        }
        s += 2;
    }
    if let Some(sub) = entry.iface_subclass {
        if Some(sub) != fp.iface_subclass {
            return None;
        }
        s += 1;
    }
    if let Some(proto) = entry.iface_protocol {
        if Some(proto) != fp.iface_protocol {
            return None;
        }
        s += 1;
    }
    Some(s)
}

impl QuirkDatabase {
    pub fn new(entries: Vec<DeviceQuirk>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[DeviceQuirk] {
        &self.entries
    }

    /// Returns the highest-scoring entry whose vid/pid match `fp` and whose
    /// every declared field agrees with `fp`. Ties are broken by entry
    /// order (first entry of equal score wins).
    pub fn match_fingerprint(&self, fp: &Fingerprint) -> Option<&DeviceQuirk> {
        let mut best: Option<(u32, &DeviceQuirk)> = None;
        for entry in &self.entries {
            if let Some(s) = score(fp, &entry.fingerprint) {
                match &best {
                    Some((best_score, _)) if *best_score >= s => {}
                    _ => best = Some((s, entry)),
                }
            }
        }
        best.map(|(_, e)| e)
    }

    /// Builds the merged, clamped tuning for `fp`. `quirk` is normally the
    /// result of `match_fingerprint(fp)` but callers may pass an explicit
    /// entry (e.g. to test one in isolation, per spec §8.1).
    pub fn build_effective(
        &self,
        fp: &Fingerprint,
        capabilities: Capabilities,
        learned: Option<LearnedProfile>,
        quirk: Option<&DeviceQuirk>,
        overrides: Option<&HashMap<String, String>>,
    ) -> EffectiveTuning {
        let mut policy = BuildPolicy::default();

        // Layer 1: built-in defaults.
        let mut max_chunk_bytes: u32 = 1024 * 1024;
        let mut io_timeout_ms: u64 = 8_000;
        let mut handshake_timeout_ms: u64 = 6_000;
        let mut inactivity_timeout_ms: u64 = 30_000;
        let mut overall_deadline_ms: u64 = 300_000;
        let mut stabilize_ms: u64 = 0;
        let mut reset_on_open: bool = false;
        let mut flags = QuirkFlags {
            disable_event_pump: false,
            ..Default::default()
        };
        let mut operations: HashMap<String, bool> = HashMap::new();
        let mut hooks = Vec::new();

        for f in [
            "maxChunkBytes",
            "ioTimeoutMs",
            "handshakeTimeoutMs",
            "inactivityTimeoutMs",
            "overallDeadlineMs",
            "stabilizeMs",
            "resetOnOpen",
        ] {
            mark(&mut policy, f, FieldSource::Defaults);
        }

        // Layer 2: interface-class hints (PTP still-image class 0x06).
        if fp.iface_class == Some(0x06) {
            operations.insert("supportsGetObjectPropList".to_string(), true);
            operations.insert("prefersPropListEnumeration".to_string(), true);
            operations.insert("supportsPartialRead32".to_string(), true);
            flags.requires_kernel_detach = false;
        }

        // Layer 3: capability-probe results.
        for (k, v) in capabilities.as_operations() {
            operations.insert(k, v);
        }
        mark(&mut policy, "operations", FieldSource::Capability);

        // Layer 4: learned profile.
        if let Some(l) = learned {
            if let Some(v) = l.max_chunk_bytes {
                max_chunk_bytes = v;
                mark(&mut policy, "maxChunkBytes", FieldSource::Learned);
            }
            if let Some(v) = l.io_timeout_ms {
                io_timeout_ms = v;
                mark(&mut policy, "ioTimeoutMs", FieldSource::Learned);
            }
            if let Some(v) = l.stabilize_ms {
                stabilize_ms = v;
                mark(&mut policy, "stabilizeMs", FieldSource::Learned);
            }
        }

        // Layer 5: static quirk entry (tuning + hooks + flags + operations).
        if let Some(q) = quirk {
            apply_tuning(
                &q.tuning,
                &mut max_chunk_bytes,
                &mut io_timeout_ms,
                &mut handshake_timeout_ms,
                &mut inactivity_timeout_ms,
                &mut overall_deadline_ms,
                &mut stabilize_ms,
                &mut reset_on_open,
                &mut policy,
                FieldSource::Quirk,
            );
            hooks = q.hooks.clone();
            flags.write_to_subfolder_only |= q.flags.write_to_subfolder_only;
            flags.requires_kernel_detach = q.flags.requires_kernel_detach;
            flags.disable_event_pump |= q.flags.disable_event_pump;
            for (k, v) in &q.operations {
                operations.insert(k.clone(), *v);
            }
        }

        // Layer 6: user overrides (string map; unknown keys ignored).
        if let Some(ov) = overrides {
            if let Some(v) = ov.get("maxChunkBytes").and_then(|s| parse_num(s)) {
                max_chunk_bytes = v as u32;
                mark(&mut policy, "maxChunkBytes", FieldSource::User);
            }
            if let Some(v) = ov.get("ioTimeoutMs").and_then(|s| parse_num(s)) {
                io_timeout_ms = v;
                mark(&mut policy, "ioTimeoutMs", FieldSource::User);
            }
            if let Some(v) = ov.get("handshakeTimeoutMs").and_then(|s| parse_num(s)) {
                handshake_timeout_ms = v;
                mark(&mut policy, "handshakeTimeoutMs", FieldSource::User);
            }
            if let Some(v) = ov.get("inactivityTimeoutMs").and_then(|s| parse_num(s)) {
                inactivity_timeout_ms = v;
                mark(&mut policy, "inactivityTimeoutMs", FieldSource::User);
            }
            if let Some(v) = ov.get("overallDeadlineMs").and_then(|s| parse_num(s)) {
                overall_deadline_ms = v;
                mark(&mut policy, "overallDeadlineMs", FieldSource::User);
            }
            if let Some(v) = ov.get("stabilizeMs").and_then(|s| parse_num(s)) {
                stabilize_ms = v;
                mark(&mut policy, "stabilizeMs", FieldSource::User);
            }
        }

        // Clamping.
        max_chunk_bytes = max_chunk_bytes.clamp(MIN_CHUNK_BYTES, MAX_CHUNK_BYTES);
        io_timeout_ms = io_timeout_ms.clamp(MIN_DURATION_MS, MAX_IO_TIMEOUT_MS);
        handshake_timeout_ms = handshake_timeout_ms.max(MIN_DURATION_MS);
        inactivity_timeout_ms = inactivity_timeout_ms.max(MIN_DURATION_MS);
        overall_deadline_ms = overall_deadline_ms.max(MIN_DURATION_MS);
        stabilize_ms = stabilize_ms.max(0);

        EffectiveTuning {
            max_chunk_bytes,
            io_timeout_ms,
            handshake_timeout_ms,
            inactivity_timeout_ms,
            overall_deadline_ms,
            stabilize_ms,
            reset_on_open,
            operations,
            hooks,
            flags,
            policy,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_tuning(
    t: &Tuning,
    max_chunk_bytes: &mut u32,
    io_timeout_ms: &mut u64,
    handshake_timeout_ms: &mut u64,
    inactivity_timeout_ms: &mut u64,
    overall_deadline_ms: &mut u64,
    stabilize_ms: &mut u64,
    reset_on_open: &mut bool,
    policy: &mut BuildPolicy,
    source: FieldSource,
) {
    if let Some(v) = t.max_chunk_bytes {
        *max_chunk_bytes = v;
        mark(policy, "maxChunkBytes", source);
    }
    if let Some(v) = t.io_timeout_ms {
        *io_timeout_ms = v;
        mark(policy, "ioTimeoutMs", source);
    }
    if let Some(v) = t.handshake_timeout_ms {
        *handshake_timeout_ms = v;
        mark(policy, "handshakeTimeoutMs", source);
    }
    if let Some(v) = t.inactivity_timeout_ms {
        *inactivity_timeout_ms = v;
        mark(policy, "inactivityTimeoutMs", source);
    }
    if let Some(v) = t.overall_deadline_ms {
        *overall_deadline_ms = v;
        mark(policy, "overallDeadlineMs", source);
    }
    if let Some(v) = t.stabilize_ms {
        *stabilize_ms = v;
        mark(policy, "stabilizeMs", source);
    }
    if let Some(v) = t.reset_on_open {
        *reset_on_open = v;
        mark(policy, "resetOnOpen", source);
    }
}

fn parse_num(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HookPhase, QuirkStatus};

    fn fp(vid: u16, pid: u16) -> Fingerprint {
        Fingerprint { vid, pid, ..Default::default() }
    }

    fn quirk(id: &str, fp: Fingerprint) -> DeviceQuirk {
        DeviceQuirk {
            id: id.to_string(),
            device_name: None,
            category: None,
            fingerprint: fp,
            tuning: Tuning::default(),
            hooks: vec![],
            operations: HashMap::new(),
            flags: QuirkFlags::default(),
            status: QuirkStatus::Proposed,
            confidence: None,
            provenance: None,
        }
    }

    #[test]
    fn match_requires_vid_and_pid() {
        let db = QuirkDatabase::new(vec![quirk("a", fp(0x18D1, 0x4EE1))]);
        assert!(db.match_fingerprint(&fp(0x18D1, 0x4EE2)).is_none());
        assert!(db.match_fingerprint(&fp(0x18D1, 0x4EE1)).is_some());
    }

    #[test]
    fn declared_field_mismatch_disqualifies() {
        let mut q = quirk("a", fp(0x18D1, 0x4EE1));
        q.fingerprint.bcd_device = Some(0x0100);
        let db = QuirkDatabase::new(vec![q]);
        let mut probe = fp(0x18D1, 0x4EE1);
        probe.bcd_device = Some(0x0200);
        assert!(db.match_fingerprint(&probe).is_none());
    }

    #[test]
    fn higher_score_wins_and_ties_go_to_first() {
        let mut specific = quirk("specific", fp(0x18D1, 0x4EE1));
        specific.fingerprint.iface_class = Some(0x06);
        let generic = quirk("generic", fp(0x18D1, 0x4EE1));
        let db = QuirkDatabase::new(vec![generic, specific]);
        let mut probe = fp(0x18D1, 0x4EE1);
        probe.iface_class = Some(0x06);
        assert_eq!(db.match_fingerprint(&probe).unwrap().id, "specific");

        // tie: two equally generic entries, first wins.
        let db2 = QuirkDatabase::new(vec![quirk("first", fp(0x1, 0x1)), quirk("second", fp(0x1, 0x1))]);
        assert_eq!(db2.match_fingerprint(&fp(0x1, 0x1)).unwrap().id, "first");
    }

    #[test]
    fn effective_tuning_is_always_clamped() {
        let db = QuirkDatabase::new(vec![]);
        let mut q = quirk("huge", fp(0x1, 0x1));
        q.tuning.max_chunk_bytes = Some(1);
        let t = db.build_effective(&fp(0x1, 0x1), Capabilities::default(), None, Some(&q), None);
        assert_eq!(t.max_chunk_bytes, MIN_CHUNK_BYTES);

        let mut q2 = quirk("huge2", fp(0x1, 0x1));
        q2.tuning.max_chunk_bytes = Some(100_000_000);
        let t2 = db.build_effective(&fp(0x1, 0x1), Capabilities::default(), None, Some(&q2), None);
        assert_eq!(t2.max_chunk_bytes, MAX_CHUNK_BYTES);
    }

    #[test]
    fn quantified_clamp_property_holds_for_any_matching_quirk() {
        let db = QuirkDatabase::new(vec![]);
        for raw in [0u32, 1, 128 * 1024, 5_000_000, 16 * 1024 * 1024, u32::MAX] {
            let mut q = quirk("q", fp(0x2, 0x2));
            q.tuning.max_chunk_bytes = Some(raw);
            let t = db.build_effective(&fp(0x2, 0x2), Capabilities::default(), None, Some(&q), None);
            assert!(t.max_chunk_bytes >= MIN_CHUNK_BYTES && t.max_chunk_bytes <= MAX_CHUNK_BYTES);
        }
    }

    #[test]
    fn user_overrides_win_over_quirk_but_unknown_keys_are_ignored() {
        let db = QuirkDatabase::new(vec![]);
        let mut q = quirk("q", fp(0x3, 0x3));
        q.tuning.io_timeout_ms = Some(5_000);
        let mut overrides = HashMap::new();
        overrides.insert("ioTimeoutMs".to_string(), "12000".to_string());
        overrides.insert("notARealKnob".to_string(), "xyz".to_string());
        let t = db.build_effective(&fp(0x3, 0x3), Capabilities::default(), None, Some(&q), Some(&overrides));
        assert_eq!(t.io_timeout_ms, 12_000);
    }

    #[test]
    fn hooks_and_busy_backoff_pass_through_quirk() {
        let db = QuirkDatabase::new(vec![]);
        let mut q = quirk("q", fp(0x4, 0x4));
        q.hooks.push(Hook {
            phase: HookPhase::OnDeviceBusy,
            delay_ms: None,
            busy_backoff: Some(BusyBackoff { retries: 3, base_ms: 200, jitter_pct: 0.2 }),
        });
        let t = db.build_effective(&fp(0x4, 0x4), Capabilities::default(), None, Some(&q), None);
        assert_eq!(t.hooks.len(), 1);
        assert_eq!(t.hooks[0].phase, HookPhase::OnDeviceBusy);
    }

    use crate::types::{BusyBackoff, Hook};
}
