pub mod dedup;
pub mod delay;
pub mod receipt;
pub mod scheduler;
pub mod stats;

pub use dedup::DedupTracker;
pub use delay::{AdaptiveDelay, PollConfig};
pub use receipt::SpoolerReceiptPrinter;
pub use scheduler::{PollScheduler, SchedulerState, StopReason, TickOutcome};
pub use stats::PollStats;
