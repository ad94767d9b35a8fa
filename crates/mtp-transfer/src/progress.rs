//! Progress reporting, coalesced to at most 20 updates per second (spec
//! §4.8 Progress).

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub completed: u64,
    pub total: u64,
}

const MIN_INTERVAL: Duration = Duration::from_millis(50);

/// Wraps a caller-supplied progress callback and drops updates that arrive
/// faster than `MIN_INTERVAL`, always letting the final (`completed ==
/// total`) update through.
pub struct ProgressCoalescer<F: FnMut(Progress)> {
    emit: F,
    last: Option<Instant>,
}

impl<F: FnMut(Progress)> ProgressCoalescer<F> {
    pub fn new(emit: F) -> Self {
        Self { emit, last: None }
    }

    pub fn report(&mut self, progress: Progress) {
        let now = Instant::now();
        let is_final = progress.completed >= progress.total;
        let due = self.last.map(|t| now.duration_since(t) >= MIN_INTERVAL).unwrap_or(true);
        if is_final || due {
            (self.emit)(progress);
            self.last = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn always_emits_the_final_update() {
        let calls = RefCell::new(Vec::new());
        let mut c = ProgressCoalescer::new(|p| calls.borrow_mut().push(p));
        for i in 0..1000u64 {
            c.report(Progress { completed: i, total: 1000 });
        }
        c.report(Progress { completed: 1000, total: 1000 });
        assert_eq!(calls.borrow().last().copied(), Some(Progress { completed: 1000, total: 1000 }));
        // Rapid-fire updates are coalesced: far fewer than 1000 calls made it through.
        assert!(calls.borrow().len() < 1000);
    }
}
