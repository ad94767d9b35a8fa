//! The journal seam `TransferEngine` writes through. `mtp-store` provides
//! the real SQLite-backed implementation (component C9); this trait keeps
//! `mtp-transfer` free of a storage-layer dependency so it stays unit
//! testable on its own (spec §5: "every journal... write" is a suspension
//! point the engine must go through, but the engine itself doesn't care how
//! it's persisted).

/// One open transfer's journal row. `update_progress` is called before each
/// chunk per spec §4.8 point 4.
pub trait JournalHandle: Send {
    fn update_progress(&mut self, committed_bytes: u64);
    fn fail(&mut self, err: &str);
    fn complete(&mut self);
}

/// No-op sink for callers (tests, fire-and-forget transfers) that don't
/// need journaling.
#[derive(Debug, Default)]
pub struct NullJournal;

impl JournalHandle for NullJournal {
    fn update_progress(&mut self, _committed_bytes: u64) {}
    fn fail(&mut self, _err: &str) {}
    fn complete(&mut self) {}
}
