//! The poll loop.
//!
//! ```text
//! INIT ──acquire──▶ POLLING ──auth error──▶ BACKOFF_AUTH ──forced acquire──▶ POLLING
//!   │                  │                         │
//!   └──────────────────┴──── fatal / limit ──────┴──▶ STOPPED
//! ```
//!
//! [`PollScheduler::tick`] performs one step and reports how long to wait
//! before the next; [`PollScheduler::run`] drives ticks until a stop condition
//! or cancellation.

use crate::dedup::DedupTracker;
use crate::delay::{AdaptiveDelay, PollConfig};
use crate::stats::PollStats;
use keyword_matcher::KeywordExtractor;
use orders_core::{
    CoreError, Cursor, ErrorExt, ErrorKind, FeedFetcher, FetchedBatch, InstagramApiError,
    OrderSink, ReceiptPrinter, SessionProvider,
};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Init,
    Polling,
    BackoffAuth,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    LimitReached,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Wait this long, then tick again.
    Continue(Duration),
    Stopped(StopReason),
}

pub struct PollScheduler<P, F>
where
    P: SessionProvider,
    F: FeedFetcher<Session = P::Session>,
{
    provider: P,
    fetcher: F,
    session: Option<P::Session>,
    dedup: DedupTracker,
    extractor: KeywordExtractor,
    sink: Box<dyn OrderSink>,
    printer: Option<Box<dyn ReceiptPrinter>>,
    skip_usernames: HashSet<String>,
    limit: Option<u64>,
    delay: AdaptiveDelay,
    max_auth_failures: u32,
    auth_failures: u32,
    state: SchedulerState,
    stats: PollStats,
}

impl<P, F> PollScheduler<P, F>
where
    P: SessionProvider,
    F: FeedFetcher<Session = P::Session>,
{
    pub fn new(
        provider: P,
        fetcher: F,
        extractor: KeywordExtractor,
        sink: Box<dyn OrderSink>,
        config: PollConfig,
    ) -> Self {
        Self {
            provider,
            fetcher,
            session: None,
            dedup: DedupTracker::new(),
            extractor,
            sink,
            printer: None,
            skip_usernames: HashSet::new(),
            limit: None,
            max_auth_failures: config.max_auth_failures.max(1),
            delay: AdaptiveDelay::new(config),
            auth_failures: 0,
            state: SchedulerState::Init,
            stats: PollStats::default(),
        }
    }

    pub fn with_printer(mut self, printer: Option<Box<dyn ReceiptPrinter>>) -> Self {
        self.printer = printer;
        self
    }

    /// Comments from these accounts are marked seen but never matched.
    pub fn with_skip_usernames<I, S>(mut self, usernames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_usernames = usernames.into_iter().map(Into::into).collect();
        self
    }

    /// Stop after `limit` recorded orders; zero means unlimited.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = (limit > 0).then_some(limit);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn cursor(&self) -> Cursor {
        self.dedup.cursor()
    }

    pub fn stats(&self) -> &PollStats {
        &self.stats
    }

    pub fn consecutive_auth_failures(&self) -> u32 {
        self.auth_failures
    }

    /// Drives ticks until the limit is reached, `cancel` fires, or a fatal
    /// error occurs. Cancellation interrupts both sleeps and in-flight ticks.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<StopReason, CoreError> {
        let result = self.drive(&cancel).await;
        self.state = SchedulerState::Stopped;

        match &result {
            Ok(reason) => info!("Poll loop stopped ({:?}): {}", reason, self.stats),
            Err(e) => error!("Poll loop aborted: {} ({})", e, self.stats),
        }
        result
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<StopReason, CoreError> {
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StopReason::Cancelled),
                outcome = self.tick() => outcome?,
            };

            match outcome {
                TickOutcome::Stopped(reason) => return Ok(reason),
                TickOutcome::Continue(delay) if delay.is_zero() => {}
                TickOutcome::Continue(delay) => {
                    debug!("Sleeping {:.1?}", delay);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(StopReason::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Performs one state-machine step.
    pub async fn tick(&mut self) -> Result<TickOutcome, CoreError> {
        match self.state {
            SchedulerState::Init => self.acquire(false).await,
            SchedulerState::BackoffAuth => self.acquire(true).await,
            SchedulerState::Polling => self.poll().await,
            SchedulerState::Stopped => Err(CoreError::Internal {
                message: "poll loop already stopped".to_string(),
            }),
        }
    }

    async fn acquire(&mut self, force_fresh: bool) -> Result<TickOutcome, CoreError> {
        match self.provider.acquire(force_fresh).await {
            Ok(session) => {
                info!(
                    "Session {}; polling",
                    if force_fresh { "re-established" } else { "ready" }
                );
                self.session = Some(session);
                self.state = SchedulerState::Polling;
                Ok(TickOutcome::Continue(Duration::ZERO))
            }
            Err(e) if e.kind() == ErrorKind::Transient => {
                e.log_warn();
                self.stats.transient_errors += 1;
                Ok(TickOutcome::Continue(self.delay.error_delay()))
            }
            Err(e) => Err(self.stop_with(e)),
        }
    }

    async fn poll(&mut self) -> Result<TickOutcome, CoreError> {
        let Some(session) = self.session.as_ref() else {
            self.state = SchedulerState::Init;
            return Ok(TickOutcome::Continue(Duration::ZERO));
        };

        let cursor = self.dedup.cursor();
        debug!("Fetching comments since {}", cursor);
        let result = self.fetcher.fetch_since(session, cursor).await;
        self.stats.ticks += 1;

        match result {
            Ok(batch) => self.process(batch).await,
            Err(e) => match e.kind() {
                ErrorKind::Auth => self.on_auth_failure(e),
                ErrorKind::Transient => {
                    e.log_warn();
                    self.stats.transient_errors += 1;
                    Ok(TickOutcome::Continue(self.delay.error_delay()))
                }
                _ => Err(self.stop_with(e)),
            },
        }
    }

    fn on_auth_failure(&mut self, e: CoreError) -> Result<TickOutcome, CoreError> {
        self.auth_failures += 1;
        self.stats.auth_failures += 1;
        self.session = None;

        if self.auth_failures >= self.max_auth_failures {
            error!(
                "Session rejected {} times in a row: {}",
                self.auth_failures, e
            );
            return Err(self.stop_with(
                InstagramApiError::ReauthLimitReached {
                    failures: self.auth_failures,
                }
                .into(),
            ));
        }

        warn!(
            "Session rejected ({}/{}): {}; re-authenticating",
            self.auth_failures, self.max_auth_failures, e
        );
        self.state = SchedulerState::BackoffAuth;
        Ok(TickOutcome::Continue(self.delay.error_delay()))
    }

    async fn process(&mut self, batch: FetchedBatch) -> Result<TickOutcome, CoreError> {
        self.auth_failures = 0;
        self.stats.comments_fetched += batch.comments.len() as u64;
        if batch.possibly_truncated {
            self.stats.truncated_batches += 1;
        }

        let admitted = self.dedup.admit(&batch.comments);
        self.stats.comments_admitted += admitted.len() as u64;

        let mut matched = false;
        let mut limit_reached = false;

        'comments: for comment in &admitted {
            if self.skip_usernames.contains(&comment.username) {
                debug!("Skipping comment from {}", comment.username);
                self.stats.comments_skipped += 1;
                continue;
            }

            for order in self.extractor.extract(&comment.text) {
                let record = match self.sink.record(&order, comment) {
                    Ok(record) => record,
                    Err(e) => return Err(self.stop_with(e)),
                };
                matched = true;
                self.stats.orders_recorded += 1;
                info!(
                    "Order {} from {} ({}): {}",
                    record.order, record.username, record.user_id, record.text
                );

                if let Some(printer) = &self.printer {
                    if let Err(e) = printer.print_receipt(&comment.username, &comment.text, &order).await {
                        self.stats.receipt_failures += 1;
                        warn!("Receipt for {} failed: {}", comment.username, e);
                    }
                }

                if self
                    .limit
                    .is_some_and(|limit| self.stats.orders_recorded >= limit)
                {
                    limit_reached = true;
                    break 'comments;
                }
            }
        }

        let cursor = self.dedup.advance_cursor(&batch.comments);
        self.delay.record_tick(matched);

        if limit_reached {
            info!(
                "Order limit of {} reached",
                self.stats.orders_recorded
            );
            self.state = SchedulerState::Stopped;
            return Ok(TickOutcome::Stopped(StopReason::LimitReached));
        }

        let delay = self.delay.next_delay();
        info!(
            "Fetched {} comments ({} new), cursor {}, next poll in {:.1?}",
            batch.comments.len(),
            admitted.len(),
            cursor,
            delay
        );
        Ok(TickOutcome::Continue(delay))
    }

    fn stop_with(&mut self, error: CoreError) -> CoreError {
        self.state = SchedulerState::Stopped;
        error.log_error();
        error
    }
}
