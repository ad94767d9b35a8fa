//! Quirk database file loading (spec §6.1). Lenient JSON decoding: numeric
//! fields may be hex-prefixed strings or plain integers, `tuning` may be a
//! legacy flat shape (fields directly on the entry) or the nested `tuning{}`
//! object, and unknown `status` strings fall back to `proposed`.

use crate::types::{
    BusyBackoff, Confidence, DeviceQuirk, Fingerprint, Hook, HookPhase, Provenance, QuirkFlags,
    QuirkStatus, Tuning,
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum QuirkFileError {
    #[error("failed to read {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("invalid JSON in {path}: {source}")]
    Json { path: String, #[source] source: serde_json::Error },
    #[error("entry {0} is missing required field 'match.vid' or 'match.pid'")]
    MissingFingerprint(String),
    #[error("duplicate quirk id: {0}")]
    DuplicateId(String),
}

fn hex_or_int_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                u64::from_str_radix(hex, 16).ok()
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    }
}

fn hex_or_int_u16(v: &Value) -> Option<u16> {
    hex_or_int_u64(v).map(|x| x as u16)
}

fn hex_or_int_u8(v: &Value) -> Option<u8> {
    hex_or_int_u64(v).map(|x| x as u8)
}

fn parse_fingerprint(v: &Value) -> Option<Fingerprint> {
    let vid = hex_or_int_u16(v.get("vid")?)?;
    let pid = hex_or_int_u16(v.get("pid")?)?;
    let bcd_device = v.get("bcdDevice").and_then(hex_or_int_u16);
    let (iface_class, iface_subclass, iface_protocol) = match v.get("iface") {
        Some(iface) => (
            iface.get("class").and_then(hex_or_int_u8),
            iface.get("subclass").and_then(hex_or_int_u8),
            iface.get("protocol").and_then(hex_or_int_u8),
        ),
        None => (None, None, None),
    };
    Some(Fingerprint {
        vid,
        pid,
        bcd_device,
        iface_class,
        iface_subclass,
        iface_protocol,
    })
}

/// Accepts both legacy flat tuning fields directly on `v`, and a nested
/// `tuning{}` object. When both are present, nested values win.
fn parse_tuning(v: &Value) -> Tuning {
    let mut t = Tuning::default();
    let mut apply = |src: &Value| {
        if let Some(x) = src.get("maxChunkBytes").and_then(hex_or_int_u64) {
            t.max_chunk_bytes = Some(x as u32);
        }
        if let Some(x) = src.get("ioTimeoutMs").and_then(hex_or_int_u64) {
            t.io_timeout_ms = Some(x);
        }
        if let Some(x) = src.get("handshakeTimeoutMs").and_then(hex_or_int_u64) {
            t.handshake_timeout_ms = Some(x);
        }
        if let Some(x) = src.get("inactivityTimeoutMs").and_then(hex_or_int_u64) {
            t.inactivity_timeout_ms = Some(x);
        }
        if let Some(x) = src.get("overallDeadlineMs").and_then(hex_or_int_u64) {
            t.overall_deadline_ms = Some(x);
        }
        if let Some(x) = src.get("stabilizeMs").and_then(hex_or_int_u64) {
            t.stabilize_ms = Some(x);
        }
        if let Some(x) = src.get("resetOnOpen").and_then(Value::as_bool) {
            t.reset_on_open = Some(x);
        }
    };
    // legacy flat form lives directly on the entry.
    apply(v);
    if let Some(nested) = v.get("tuning") {
        apply(nested);
    }
    t
}

fn parse_hooks(v: &Value) -> Vec<Hook> {
    let Some(arr) = v.get("hooks").and_then(Value::as_array) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|h| {
            let phase = HookPhase::parse(h.get("phase")?.as_str()?)?;
            let delay_ms = h.get("delayMs").and_then(hex_or_int_u64);
            let busy_backoff = h.get("busyBackoff").and_then(|b| {
                Some(BusyBackoff {
                    retries: hex_or_int_u64(b.get("retries")?)? as u32,
                    base_ms: hex_or_int_u64(b.get("baseMs")?)?,
                    jitter_pct: b.get("jitterPct")?.as_f64()?,
                })
            });
            Some(Hook { phase, delay_ms, busy_backoff })
        })
        .collect()
}

fn parse_operations(v: &Value) -> HashMap<String, bool> {
    let mut m = HashMap::new();
    if let Some(obj) = v.get("ops").and_then(Value::as_object) {
        for (k, val) in obj {
            if let Some(b) = val.as_bool() {
                m.insert(k.clone(), b);
            }
        }
    }
    m
}

fn parse_flags(v: &Value) -> QuirkFlags {
    let mut f = QuirkFlags::default();
    if let Some(obj) = v.get("flags").and_then(Value::as_object) {
        if let Some(b) = obj.get("writeToSubfolderOnly").and_then(Value::as_bool) {
            f.write_to_subfolder_only = b;
        }
        if let Some(b) = obj.get("requiresKernelDetach").and_then(Value::as_bool) {
            f.requires_kernel_detach = b;
        }
        if let Some(b) = obj.get("disableEventPump").and_then(Value::as_bool) {
            f.disable_event_pump = b;
        }
    }
    f
}

fn parse_entry(v: &Value) -> Result<DeviceQuirk, QuirkFileError> {
    let id = v
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let fingerprint = v
        .get("match")
        .and_then(parse_fingerprint)
        .ok_or_else(|| QuirkFileError::MissingFingerprint(id.clone()))?;
    let status = v
        .get("status")
        .and_then(Value::as_str)
        .map(QuirkStatus::parse)
        .unwrap_or(QuirkStatus::Proposed);
    let confidence = v.get("confidence").and_then(Value::as_str).and_then(|s| {
        Some(match s {
            "low" => Confidence::Low,
            "medium" => Confidence::Medium,
            "high" => Confidence::High,
            _ => return None,
        })
    });
    let provenance = v.get("provenance").map(|p| Provenance {
        submitted_by: p.get("submittedBy").and_then(Value::as_str).map(str::to_string),
        date: p.get("date").and_then(Value::as_str).map(str::to_string),
    });

    Ok(DeviceQuirk {
        id,
        device_name: v.get("deviceName").and_then(Value::as_str).map(str::to_string),
        category: v.get("category").and_then(Value::as_str).map(str::to_string),
        fingerprint,
        tuning: parse_tuning(v),
        hooks: parse_hooks(v),
        operations: parse_operations(v),
        flags: parse_flags(v),
        status,
        confidence,
        provenance,
    })
}

/// Parses a quirk database document already loaded into memory (used by
/// tests and by callers that fetch the file over some other channel).
pub fn parse_document(text: &str) -> Result<Vec<DeviceQuirk>, QuirkFileError> {
    let doc: Value = serde_json::from_str(text).map_err(|e| QuirkFileError::Json {
        path: "<memory>".to_string(),
        source: e,
    })?;
    let entries = doc
        .get("entries")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(entries.len());
    for raw in &entries {
        let q = parse_entry(raw)?;
        if !seen.insert(q.id.clone()) {
            return Err(QuirkFileError::DuplicateId(q.id));
        }
        out.push(q);
    }
    Ok(out)
}

/// Loads and parses a quirk database file from disk (spec §6.1).
pub fn load_quirk_file(path: &Path) -> Result<Vec<DeviceQuirk>, QuirkFileError> {
    let text = std::fs::read_to_string(path).map_err(|e| QuirkFileError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_document(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_flat_tuning() {
        let doc = r#"{
            "schemaVersion": "1.0.0",
            "entries": [
                { "id": "a", "match": {"vid":"0x18D1","pid":"0x4EE1"},
                  "maxChunkBytes": 2097152, "status": "verified" }
            ]
        }"#;
        let entries = parse_document(doc).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tuning.max_chunk_bytes, Some(2097152));
        assert_eq!(entries[0].status, QuirkStatus::Verified);
    }

    #[test]
    fn parses_nested_tuning() {
        let doc = r#"{
            "schemaVersion": "1.0.0",
            "entries": [
                { "id": "a", "match": {"vid":18001,"pid":20193},
                  "tuning": {"ioTimeoutMs": 12000},
                  "hooks": [{"phase":"postOpenSession","delayMs":400}] }
            ]
        }"#;
        let entries = parse_document(doc).unwrap();
        assert_eq!(entries[0].tuning.io_timeout_ms, Some(12000));
        assert_eq!(entries[0].hooks.len(), 1);
        assert_eq!(entries[0].hooks[0].delay_ms, Some(400));
    }

    #[test]
    fn unknown_status_defaults_to_proposed() {
        let doc = r#"{"schemaVersion":"1.0.0","entries":[
            {"id":"a","match":{"vid":1,"pid":1},"status":"experimental"}
        ]}"#;
        let entries = parse_document(doc).unwrap();
        assert_eq!(entries[0].status, QuirkStatus::Proposed);
    }

    #[test]
    fn duplicate_ids_are_a_schema_error() {
        let doc = r#"{"schemaVersion":"1.0.0","entries":[
            {"id":"a","match":{"vid":1,"pid":1}},
            {"id":"a","match":{"vid":2,"pid":2}}
        ]}"#;
        assert!(matches!(parse_document(doc), Err(QuirkFileError::DuplicateId(_))));
    }

    #[test]
    fn missing_fingerprint_is_rejected() {
        let doc = r#"{"schemaVersion":"1.0.0","entries":[{"id":"a"}]}"#;
        assert!(matches!(
            parse_document(doc),
            Err(QuirkFileError::MissingFingerprint(_))
        ));
    }
}
