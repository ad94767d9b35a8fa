//! Device-match scoring and layered effective-tuning resolution (C2).

pub mod db;
pub mod file;
pub mod types;

pub use db::QuirkDatabase;
pub use file::{load_quirk_file, parse_document, QuirkFileError};
pub use types::{
    BuildPolicy, BusyBackoff, Capabilities, Confidence, DeviceQuirk, EffectiveTuning, FieldSource,
    Fingerprint, Hook, HookPhase, LearnedProfile, Provenance, QuirkFlags, QuirkStatus, Tuning,
    MAX_CHUNK_BYTES, MAX_IO_TIMEOUT_MS, MIN_CHUNK_BYTES, MIN_DURATION_MS,
};
