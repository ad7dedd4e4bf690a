use async_trait::async_trait;
use keyword_matcher::KeywordExtractor;
use orders_core::{
    Comment, CoreError, Cursor, FeedFetcher, FetchedBatch, GrammarKind, InstagramApiError,
    OrderMatch, OrderRecord, OrderSink, ReceiptPrinter, SessionProvider, StoreError,
};
use poll_service::{PollConfig, PollScheduler, SchedulerState, StopReason, TickOutcome};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct FakeProvider {
    script: Arc<Mutex<VecDeque<Result<u32, CoreError>>>>,
    calls: Arc<Mutex<Vec<bool>>>,
}

impl FakeProvider {
    fn scripted(results: Vec<Result<u32, CoreError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(results.into())),
            calls: Arc::default(),
        }
    }

    fn calls(&self) -> Vec<bool> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionProvider for FakeProvider {
    type Session = u32;

    async fn acquire(&self, force_fresh: bool) -> Result<u32, CoreError> {
        self.calls.lock().unwrap().push(force_fresh);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or(Ok(1))
    }
}

enum FeedStep {
    Batch(Vec<Comment>),
    Truncated(Vec<Comment>),
    Fail(CoreError),
    Hang,
}

#[derive(Clone, Default)]
struct FakeFeed {
    script: Arc<Mutex<VecDeque<FeedStep>>>,
    cursors: Arc<Mutex<Vec<Cursor>>>,
}

impl FakeFeed {
    fn scripted(steps: Vec<FeedStep>) -> Self {
        Self {
            script: Arc::new(Mutex::new(steps.into())),
            cursors: Arc::default(),
        }
    }

    fn cursors(&self) -> Vec<Cursor> {
        self.cursors.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedFetcher for FakeFeed {
    type Session = u32;

    async fn fetch_since(&self, _session: &u32, cursor: Cursor) -> Result<FetchedBatch, CoreError> {
        self.cursors.lock().unwrap().push(cursor);
        let step = self.script.lock().unwrap().pop_front();
        match step {
            None => Ok(FetchedBatch::new(Vec::new(), 0, 50)),
            Some(FeedStep::Batch(comments)) => {
                let raw_size = comments.len();
                Ok(FetchedBatch::new(comments, raw_size, 50))
            }
            Some(FeedStep::Truncated(comments)) => {
                let raw_size = comments.len();
                Ok(FetchedBatch::new(comments, raw_size, raw_size))
            }
            Some(FeedStep::Fail(e)) => Err(e),
            Some(FeedStep::Hang) => std::future::pending().await,
        }
    }
}

#[derive(Clone, Default)]
struct MemorySink {
    records: Arc<Mutex<Vec<OrderRecord>>>,
    fail: bool,
}

impl MemorySink {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn rows(&self) -> Vec<Vec<String>> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|record| record.to_row()[1..].to_vec())
            .collect()
    }
}

impl OrderSink for MemorySink {
    fn record(&mut self, order: &OrderMatch, comment: &Comment) -> Result<OrderRecord, CoreError> {
        if self.fail {
            return Err(StoreError::WriteFailed {
                path: "orders.csv".to_string(),
                reason: "disk full".to_string(),
            }
            .into());
        }
        let record = OrderRecord::new(order.clone(), comment);
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }
}

#[derive(Clone, Default)]
struct RecordingPrinter {
    printed: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

#[async_trait]
impl ReceiptPrinter for RecordingPrinter {
    async fn print_receipt(
        &self,
        username: &str,
        _text: &str,
        order: &OrderMatch,
    ) -> Result<(), CoreError> {
        if self.fail {
            return Err(CoreError::Receipt {
                message: "printer offline".to_string(),
            });
        }
        self.printed
            .lock()
            .unwrap()
            .push(format!("{}:{}", username, order.tag()));
        Ok(())
    }
}

fn comment(id: &str, username: &str, text: &str, created_at: i64) -> Comment {
    Comment {
        id: id.to_string(),
        user_id: format!("uid-{}", username),
        username: username.to_string(),
        text: text.to_string(),
        created_at,
    }
}

fn auth_error() -> CoreError {
    CoreError::InstagramApi(InstagramApiError::LoginRequired)
}

fn transient_error() -> CoreError {
    CoreError::InstagramApi(InstagramApiError::ServerError { status_code: 502 })
}

fn fast_config() -> PollConfig {
    PollConfig {
        min_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(5),
        idle_step: Duration::from_millis(1),
        jitter: Duration::ZERO,
        max_auth_failures: 3,
    }
}

fn scheduler(
    provider: FakeProvider,
    feed: FakeFeed,
    sink: MemorySink,
) -> PollScheduler<FakeProvider, FakeFeed> {
    PollScheduler::new(
        provider,
        feed,
        KeywordExtractor::new(GrammarKind::Grouped),
        Box::new(sink),
        fast_config(),
    )
}

async fn tick_n(scheduler: &mut PollScheduler<FakeProvider, FakeFeed>, n: usize) {
    for _ in 0..n {
        scheduler.tick().await.unwrap();
    }
}

#[tokio::test]
async fn test_end_to_end_single_order() {
    let feed = FakeFeed::scripted(vec![
        FeedStep::Batch(vec![comment("1", "buyer", "A5+12", 100)]),
        FeedStep::Batch(vec![]),
    ]);
    let sink = MemorySink::default();
    let mut scheduler = scheduler(FakeProvider::default(), feed.clone(), sink.clone());

    assert_eq!(
        scheduler.tick().await.unwrap(),
        TickOutcome::Continue(Duration::ZERO)
    );
    assert_eq!(scheduler.state(), SchedulerState::Polling);

    tick_n(&mut scheduler, 2).await;

    assert_eq!(
        sink.rows(),
        vec![vec!["12", "A", "5", "uid-buyer", "buyer", "A5+12"]]
    );
    assert_eq!(scheduler.cursor(), Cursor::new(100));
    assert_eq!(feed.cursors(), vec![Cursor::new(0), Cursor::new(100)]);
}

#[tokio::test]
async fn test_exactly_once_across_overlapping_batches() {
    let feed = FakeFeed::scripted(vec![
        FeedStep::Batch(vec![
            comment("1", "a", "A1+1", 10),
            comment("2", "b", "B2+2", 11),
        ]),
        FeedStep::Batch(vec![
            comment("2", "b", "B2+2", 11),
            comment("3", "c", "C3+3", 12),
        ]),
        FeedStep::Batch(vec![
            comment("1", "a", "A1+1", 10),
            comment("2", "b", "B2+2", 11),
            comment("3", "c", "C3+3", 12),
        ]),
    ]);
    let sink = MemorySink::default();
    let mut scheduler = scheduler(FakeProvider::default(), feed, sink.clone());

    tick_n(&mut scheduler, 4).await;

    let usernames: Vec<String> = sink.rows().into_iter().map(|row| row[4].clone()).collect();
    assert_eq!(usernames, vec!["a", "b", "c"]);
    assert_eq!(scheduler.cursor(), Cursor::new(12));
    assert_eq!(scheduler.stats().comments_fetched, 7);
    assert_eq!(scheduler.stats().comments_admitted, 3);
}

#[tokio::test]
async fn test_multiple_matches_in_scan_order() {
    let feed = FakeFeed::scripted(vec![FeedStep::Batch(vec![comment(
        "1",
        "buyer",
        "A5+12  C3+7",
        5,
    )])]);
    let sink = MemorySink::default();
    let printer = RecordingPrinter::default();
    let mut scheduler = scheduler(FakeProvider::default(), feed, sink.clone())
        .with_printer(Some(Box::new(printer.clone())));

    tick_n(&mut scheduler, 2).await;

    let rows = sink.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][..3], ["12", "A", "5"]);
    assert_eq!(rows[1][..3], ["7", "C", "3"]);
    assert_eq!(
        *printer.printed.lock().unwrap(),
        vec!["buyer:A5_12", "buyer:C3_7"]
    );
}

#[tokio::test]
async fn test_three_consecutive_auth_errors_stop() {
    let provider = FakeProvider::default();
    let feed = FakeFeed::scripted(vec![
        FeedStep::Fail(auth_error()),
        FeedStep::Fail(auth_error()),
        FeedStep::Fail(auth_error()),
    ]);
    let mut scheduler = scheduler(provider.clone(), feed, MemorySink::default());

    scheduler.tick().await.unwrap();
    for _ in 0..2 {
        assert!(matches!(
            scheduler.tick().await.unwrap(),
            TickOutcome::Continue(delay) if delay >= Duration::from_millis(1)
        ));
        assert_eq!(scheduler.state(), SchedulerState::BackoffAuth);
        scheduler.tick().await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Polling);
    }

    let result = scheduler.tick().await;
    assert!(matches!(
        result,
        Err(CoreError::InstagramApi(InstagramApiError::ReauthLimitReached {
            failures: 3
        }))
    ));
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    // Initial acquire, then two forced re-authentications.
    assert_eq!(provider.calls(), vec![false, true, true]);
}

#[tokio::test]
async fn test_auth_errors_interleaved_with_success_never_stop() {
    let mut steps = Vec::new();
    for _ in 0..3 {
        steps.push(FeedStep::Fail(auth_error()));
        steps.push(FeedStep::Fail(auth_error()));
        steps.push(FeedStep::Batch(vec![]));
    }
    let mut scheduler = scheduler(
        FakeProvider::default(),
        FakeFeed::scripted(steps),
        MemorySink::default(),
    );

    // Init, then per round: auth, backoff, auth, backoff, success.
    tick_n(&mut scheduler, 1 + 3 * 5).await;
    assert_eq!(scheduler.state(), SchedulerState::Polling);
    assert_eq!(scheduler.consecutive_auth_failures(), 0);
    assert_eq!(scheduler.stats().auth_failures, 6);
}

#[tokio::test]
async fn test_transient_errors_do_not_touch_auth_counter() {
    let feed = FakeFeed::scripted(vec![
        FeedStep::Fail(auth_error()),
        FeedStep::Fail(transient_error()),
        FeedStep::Fail(transient_error()),
        FeedStep::Fail(auth_error()),
        FeedStep::Fail(transient_error()),
        FeedStep::Fail(auth_error()),
    ]);
    let mut scheduler = scheduler(FakeProvider::default(), feed, MemorySink::default());

    // Init, auth, backoff, transient, transient, auth, backoff, transient.
    tick_n(&mut scheduler, 8).await;
    assert_eq!(scheduler.consecutive_auth_failures(), 2);
    assert_eq!(scheduler.stats().transient_errors, 3);

    assert!(scheduler.tick().await.is_err());
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[test]
fn test_auth_error_during_init_is_fatal() {
    let provider = FakeProvider::scripted(vec![Err(auth_error())]);
    let mut scheduler = scheduler(provider, FakeFeed::default(), MemorySink::default());

    let result = tokio_test::block_on(scheduler.tick());
    assert!(matches!(
        result,
        Err(CoreError::InstagramApi(InstagramApiError::LoginRequired))
    ));
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert!(tokio_test::block_on(scheduler.tick()).is_err());
}

#[tokio::test]
async fn test_transient_error_during_init_is_retried() {
    let provider = FakeProvider::scripted(vec![Err(transient_error()), Ok(7)]);
    let mut scheduler = scheduler(provider.clone(), FakeFeed::default(), MemorySink::default());

    assert!(matches!(
        scheduler.tick().await.unwrap(),
        TickOutcome::Continue(delay) if !delay.is_zero()
    ));
    assert_eq!(scheduler.state(), SchedulerState::Init);

    scheduler.tick().await.unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Polling);
    assert_eq!(provider.calls(), vec![false, false]);
}

#[tokio::test]
async fn test_auth_error_during_reauthentication_is_fatal() {
    let provider = FakeProvider::scripted(vec![Ok(1), Err(auth_error())]);
    let feed = FakeFeed::scripted(vec![FeedStep::Fail(auth_error())]);
    let mut scheduler = scheduler(provider, feed, MemorySink::default());

    tick_n(&mut scheduler, 2).await;
    assert_eq!(scheduler.state(), SchedulerState::BackoffAuth);
    assert!(scheduler.tick().await.is_err());
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test]
async fn test_persist_error_is_fatal() {
    let feed = FakeFeed::scripted(vec![FeedStep::Batch(vec![comment("1", "buyer", "A5+12", 1)])]);
    let mut scheduler = scheduler(FakeProvider::default(), feed, MemorySink::failing());

    scheduler.tick().await.unwrap();
    let result = scheduler.tick().await;
    assert!(matches!(
        result,
        Err(CoreError::Store(StoreError::WriteFailed { .. }))
    ));
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test]
async fn test_limit_stops_mid_batch_and_advances_cursor() {
    let feed = FakeFeed::scripted(vec![FeedStep::Batch(vec![
        comment("1", "a", "A1+1", 10),
        comment("2", "b", "A1+2", 20),
        comment("3", "c", "A1+3", 30),
    ])]);
    let sink = MemorySink::default();
    let mut scheduler = scheduler(FakeProvider::default(), feed, sink.clone()).with_limit(2);

    scheduler.tick().await.unwrap();
    assert_eq!(
        scheduler.tick().await.unwrap(),
        TickOutcome::Stopped(StopReason::LimitReached)
    );
    assert_eq!(sink.rows().len(), 2);
    assert_eq!(scheduler.cursor(), Cursor::new(30));
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test]
async fn test_run_until_limit() {
    let feed = FakeFeed::scripted(vec![
        FeedStep::Fail(transient_error()),
        FeedStep::Batch(vec![comment("1", "a", "hello", 1)]),
        FeedStep::Batch(vec![comment("2", "b", "D4+40", 2)]),
    ]);
    let sink = MemorySink::default();
    let mut scheduler = scheduler(FakeProvider::default(), feed, sink.clone()).with_limit(1);

    let reason = scheduler.run(CancellationToken::new()).await.unwrap();
    assert_eq!(reason, StopReason::LimitReached);
    assert_eq!(sink.rows(), vec![vec!["40", "D", "4", "uid-b", "b", "D4+40"]]);
}

#[tokio::test]
async fn test_zero_limit_is_unlimited() {
    let feed = FakeFeed::scripted(vec![FeedStep::Batch(vec![
        comment("1", "a", "A1+1", 1),
        comment("2", "b", "A1+2", 2),
    ])]);
    let sink = MemorySink::default();
    let mut scheduler = scheduler(FakeProvider::default(), feed, sink.clone()).with_limit(0);

    tick_n(&mut scheduler, 2).await;
    assert_eq!(sink.rows().len(), 2);
    assert_eq!(scheduler.state(), SchedulerState::Polling);
}

#[tokio::test]
async fn test_cancellation_interrupts_fetch() {
    let feed = FakeFeed::scripted(vec![FeedStep::Hang]);
    let mut scheduler = scheduler(FakeProvider::default(), feed, MemorySink::default());

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let reason = scheduler.run(token).await.unwrap();
    assert_eq!(reason, StopReason::Cancelled);
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test]
async fn test_cancellation_interrupts_sleep() {
    let config = PollConfig {
        min_interval: Duration::from_secs(60),
        max_interval: Duration::from_secs(60),
        ..fast_config()
    };
    let mut scheduler = PollScheduler::new(
        FakeProvider::default(),
        FakeFeed::default(),
        KeywordExtractor::new(GrammarKind::Grouped),
        Box::new(MemorySink::default()),
        config,
    );

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let reason = scheduler.run(token).await.unwrap();
    assert_eq!(reason, StopReason::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(scheduler.stats().ticks, 1);
}

#[tokio::test]
async fn test_skip_list_marks_seen_without_matching() {
    let feed = FakeFeed::scripted(vec![
        FeedStep::Batch(vec![
            comment("1", "shop_owner", "A5+12", 1),
            comment("2", "buyer", "B1+1", 2),
        ]),
        FeedStep::Batch(vec![comment("1", "shop_owner", "A5+12", 1)]),
    ]);
    let sink = MemorySink::default();
    let mut scheduler = scheduler(FakeProvider::default(), feed, sink.clone())
        .with_skip_usernames(["shop_owner"]);

    tick_n(&mut scheduler, 3).await;
    let rows = sink.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][4], "buyer");
    assert_eq!(scheduler.stats().comments_skipped, 1);
}

#[tokio::test]
async fn test_receipt_failure_is_not_fatal() {
    let feed = FakeFeed::scripted(vec![FeedStep::Batch(vec![comment("1", "buyer", "A5+12", 1)])]);
    let sink = MemorySink::default();
    let printer = RecordingPrinter {
        fail: true,
        ..RecordingPrinter::default()
    };
    let mut scheduler = scheduler(FakeProvider::default(), feed, sink.clone())
        .with_printer(Some(Box::new(printer)));

    tick_n(&mut scheduler, 2).await;
    assert_eq!(sink.rows().len(), 1);
    assert_eq!(scheduler.stats().receipt_failures, 1);
    assert_eq!(scheduler.state(), SchedulerState::Polling);
}

#[tokio::test]
async fn test_truncated_batches_are_counted() {
    let feed = FakeFeed::scripted(vec![FeedStep::Truncated(vec![
        comment("1", "a", "hi", 1),
        comment("2", "b", "hi", 2),
    ])]);
    let mut scheduler = scheduler(FakeProvider::default(), feed, MemorySink::default());

    tick_n(&mut scheduler, 2).await;
    assert_eq!(scheduler.stats().truncated_batches, 1);
}

#[tokio::test]
async fn test_idle_ticks_back_off() {
    let config = PollConfig {
        min_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(40),
        idle_step: Duration::from_millis(10),
        jitter: Duration::ZERO,
        max_auth_failures: 3,
    };
    let feed = FakeFeed::scripted(vec![
        FeedStep::Batch(vec![]),
        FeedStep::Batch(vec![]),
        FeedStep::Batch(vec![comment("1", "a", "A1+1", 1)]),
    ]);
    let mut scheduler = PollScheduler::new(
        FakeProvider::default(),
        feed,
        KeywordExtractor::new(GrammarKind::Grouped),
        Box::new(MemorySink::default()),
        config,
    );

    scheduler.tick().await.unwrap();
    let mut delays = Vec::new();
    for _ in 0..3 {
        match scheduler.tick().await.unwrap() {
            TickOutcome::Continue(delay) => delays.push(delay.as_millis()),
            other => panic!("Expected to continue, got {:?}", other),
        }
    }
    assert_eq!(delays, vec![20, 30, 10]);
}
