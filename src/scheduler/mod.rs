//! Background maintenance: moderation expiry, cache eviction, statistics
//! flushing and scheduled backups.

mod runner;

pub use runner::{MaintenanceScheduler, SchedulerMessage, TickReport};
