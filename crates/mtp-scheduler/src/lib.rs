//! Crawl scheduling policies sitting above the per-device actor and its
//! persisted index (component C10, spec §4.11): seed-on-connect, boosted
//! subtree refresh, periodic background refresh and event-driven refresh,
//! all funneled through one worker per device so its folder refreshes never
//! run concurrently with each other.

pub mod error;
mod ptp_time;
mod scheduler;

pub use error::SchedulerError;
pub use scheduler::{CrawlScheduler, CrawlTask};
