//! Submission bundle shapes (spec §6.2): a directory of `submission.json`,
//! `probe.json`, `usb-dump.txt` and `bench-*.csv` rows, with serial-like
//! strings redacted before anything leaves the local machine.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub device_name: String,
    pub vid: u16,
    pub pid: u16,
    pub submitted_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub partial_read: bool,
    pub partial_read64: bool,
    pub partial_write: bool,
    pub supports_events: bool,
    pub prefer_prop_list: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchRow {
    pub timestamp: i64,
    pub operation: String,
    pub size_bytes: u64,
    pub duration_seconds: f64,
    pub speed_mbps: f64,
}

pub fn bench_csv_header() -> &'static str {
    "timestamp,operation,size_bytes,duration_seconds,speed_mbps"
}

pub fn bench_csv_row(row: &BenchRow) -> String {
    format!("{},{},{},{},{}", row.timestamp, row.operation, row.size_bytes, row.duration_seconds, row.speed_mbps)
}

/// Redacts a serial-like string with HMAC-SHA256 over a local, bundle-scoped
/// salt (spec §6.2 privacy: "the salt file must not be persisted beyond the
/// bundle's lifetime").
pub fn redact_serial(raw: &str, salt: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(salt).expect("HMAC accepts a key of any length");
    mac.update(raw.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
