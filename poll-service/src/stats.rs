use std::fmt;

/// Counters for one run of the poll loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStats {
    pub ticks: u64,
    pub comments_fetched: u64,
    pub comments_admitted: u64,
    pub comments_skipped: u64,
    pub orders_recorded: u64,
    pub truncated_batches: u64,
    pub transient_errors: u64,
    pub auth_failures: u64,
    pub receipt_failures: u64,
}

impl fmt::Display for PollStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ticks, {} comments fetched, {} new, {} skipped, {} orders, \
             {} truncated batches, {} transient errors, {} auth failures, {} receipt failures",
            self.ticks,
            self.comments_fetched,
            self.comments_admitted,
            self.comments_skipped,
            self.orders_recorded,
            self.truncated_batches,
            self.transient_errors,
            self.auth_failures,
            self.receipt_failures
        )
    }
}
