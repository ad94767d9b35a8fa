//! Resume decision (spec §4.8 Resume, §9 design note: "resume is a pure
//! function of `(committedBytes, etag, supportsPartial)`").

/// `{size, mtime}` pair used to validate a resumed transfer still targets
/// the same logical object (spec §3.8, GLOSSARY). `mtime` is compared to
/// second precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Etag {
    pub size: Option<u64>,
    pub mtime: Option<i64>,
}

impl Etag {
    pub fn matches(&self, other: &Etag) -> bool {
        self.size == other.size && self.mtime == other.mtime
    }
}

/// `supportsPartial && lastError == transient && etag matches` resumes
/// from `committed_bytes`; otherwise restarts from 0 (spec §4.8 Resume).
pub fn resume_offset(committed_bytes: u64, etag_matches: bool, supports_partial: bool) -> u64 {
    if supports_partial && etag_matches {
        committed_bytes
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resumes_only_when_partial_supported_and_etag_matches() {
        assert_eq!(resume_offset(100, true, true), 100);
        assert_eq!(resume_offset(100, false, true), 0);
        assert_eq!(resume_offset(100, true, false), 0);
    }

    #[test]
    fn etag_match_requires_both_size_and_mtime() {
        let a = Etag { size: Some(10), mtime: Some(1000) };
        let b = Etag { size: Some(10), mtime: Some(1000) };
        let c = Etag { size: Some(11), mtime: Some(1000) };
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }
}
