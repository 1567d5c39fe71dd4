use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use monthfinance::outbox::OpKind;
use monthfinance::storage::keys;
use monthfinance::{
    BackoffPolicy, CandidateStatus, Clock, Expense, ExpenseCategory, ExpenseSource, FileAdapter,
    GatewayError, ManualClock, MemoryAdapter, MemoryGateway, MergeDecision, NewExpense,
    OutboxOp, PersistenceAdapter, ReceiptCandidate, ReceiptProvider, RecordStore,
    RemoteExpenseRow, RemoteGateway, SnapshotCodec, SyncConfig, SyncEngine, SyncError,
    TickOutcome,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tempfile::tempdir;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap()
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn dec(raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap()
}

struct Harness {
    clock: Arc<ManualClock>,
    adapter: Arc<MemoryAdapter>,
    gateway: Arc<MemoryGateway>,
    engine: SyncEngine,
}

fn harness_with(config: SyncConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let adapter = Arc::new(MemoryAdapter::new());
    let gateway = Arc::new(MemoryGateway::new(clock.clone()));
    let engine = SyncEngine::open(adapter.clone(), gateway.clone(), clock.clone(), config).unwrap();
    Harness {
        clock,
        adapter,
        gateway,
        engine,
    }
}

fn harness() -> Harness {
    harness_with(SyncConfig::default())
}

fn draft(vendor: &str, amount: &str) -> NewExpense {
    NewExpense::manual(day(2025, 3, 10), vendor, dec(amount), "USD", ExpenseCategory::Tools)
}

/// Copy of `base` as another device would have written it.
fn remote_copy(base: &Expense, vendor: &str, updated_at: DateTime<Utc>) -> Expense {
    let mut copy = base.clone();
    copy.vendor = vendor.to_string();
    copy.created_at = base.created_at.min(updated_at);
    copy.updated_at = updated_at;
    copy
}

fn completed(outcome: TickOutcome) -> monthfinance::TickReport {
    match outcome {
        TickOutcome::Completed(report) => report,
        TickOutcome::Skipped => panic!("tick unexpectedly skipped"),
    }
}

#[tokio::test]
async fn add_expense_is_queued_and_flushed_on_tick() {
    let h = harness();
    let created = h.engine.add_expense(draft("Figma", "15.00")).unwrap();

    assert_eq!(created.month_key, "2025-03");
    assert_eq!(created.created_at, t0());
    let pending = h.engine.pending_ops().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind(), OpKind::Upsert);
    assert_eq!(pending[0].record_id(), created.id);

    let report = completed(h.engine.tick().await);
    let drain = report.drain.as_ref().unwrap();
    assert_eq!(drain.flushed, 1);
    assert_eq!(drain.remaining, 0);
    assert!(report.is_clean());

    assert!(h.engine.pending_ops().unwrap().is_empty());
    assert_eq!(h.gateway.expense(&created.id).unwrap().vendor, "Figma");
    assert_eq!(h.engine.last_report(), Some(report));
}

#[tokio::test]
async fn offline_tick_keeps_operations_and_reports_both_phases() {
    let h = harness();
    let created = h.engine.add_expense(draft("Notion", "8.00")).unwrap();
    h.gateway.set_online(false);

    let report = completed(h.engine.tick().await);
    let drain = report.drain.as_ref().unwrap();
    assert_eq!(drain.flushed, 0);
    assert_eq!(drain.remaining, 1);
    assert_eq!(drain.failures.len(), 1);
    assert!(report.pull.is_none());
    assert!(!report.is_clean());
    assert!(report.errors.iter().any(|e| e.starts_with("pull:")));

    let pending = h.engine.pending_ops().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(pending[0].last_attempt_at, Some(t0()));
    assert!(pending[0].last_error.is_some());

    // Local reads are unaffected by the outage.
    assert_eq!(h.engine.find(&created.id).unwrap(), Some(created));
}

#[tokio::test]
async fn local_newer_record_survives_stale_remote_copy() {
    let h = harness();
    let local = h.engine.add_expense(draft("Local vendor", "20.00")).unwrap();

    // Drain fails: the network is down.
    h.gateway.set_online(false);
    completed(h.engine.tick().await);
    assert_eq!(h.engine.pending_ops().unwrap().len(), 1);

    // Another device wrote an older version of the same record.
    h.gateway.set_online(true);
    h.gateway
        .put_expense(&remote_copy(&local, "Remote vendor", t0() - Duration::seconds(1)));
    h.gateway.fail_record(local.id.clone());

    let report = completed(h.engine.tick().await);
    let pull = report.pull.unwrap();
    assert_eq!(pull.pulled, 1);
    assert_eq!(pull.ignored, 1);
    assert_eq!(pull.applied, 0);
    assert_eq!(h.engine.find(&local.id).unwrap().unwrap().vendor, "Local vendor");
    assert_eq!(h.engine.pending_ops().unwrap().len(), 1);

    // The remote accepts the upload; the outbox empties.
    h.gateway.heal_record(&local.id);
    let report = completed(h.engine.tick().await);
    assert_eq!(report.drain.unwrap().flushed, 1);
    assert!(h.engine.pending_ops().unwrap().is_empty());
    assert_eq!(h.gateway.expense(&local.id).unwrap().vendor, "Local vendor");
    // Our own upload echoes back once and loses the tie.
    let echo = report.pull.unwrap();
    assert_eq!(echo.applied, 0);
    assert_eq!(h.engine.cursor().unwrap(), Some(t0()));

    // Nothing new until the remote moves past T0.
    let report = completed(h.engine.tick().await);
    assert_eq!(report.pull.unwrap().pulled, 0);
    assert_eq!(h.engine.find(&local.id).unwrap().unwrap().vendor, "Local vendor");
}

#[tokio::test]
async fn newer_remote_edit_wins() {
    let h = harness();
    let local = h.engine.add_expense(draft("Slack", "12.50")).unwrap();
    completed(h.engine.tick().await);

    let newer = remote_copy(&local, "Slack Pro", t0() + Duration::seconds(30));
    h.gateway.put_expense(&newer);

    let report = completed(h.engine.tick().await);
    assert_eq!(report.pull.unwrap().applied, 1);
    assert_eq!(h.engine.find(&local.id).unwrap(), Some(newer));
    assert!(h.engine.pending_ops().unwrap().is_empty());
}

#[tokio::test]
async fn tombstone_is_not_resurrected_by_older_remote_copy() {
    let h = harness();
    let local = h.engine.add_expense(draft("Zoom", "14.99")).unwrap();
    completed(h.engine.tick().await);

    h.clock.advance(Duration::seconds(60));
    let tombstone = h
        .engine
        .remove_expense(&local.month_key, &local.id)
        .unwrap()
        .unwrap();
    assert!(tombstone.deleted);
    assert!(tombstone.updated_at > local.updated_at);
    assert!(h.engine.list_active("2025-03").unwrap().is_empty());

    // Keep the tombstone from reaching the remote and offer a stale active copy.
    h.gateway.fail_record(local.id.clone());
    h.gateway
        .put_expense(&remote_copy(&local, "Zoom", t0() + Duration::seconds(10)));

    let report = completed(h.engine.tick().await);
    assert_eq!(report.pull.unwrap().ignored, 1);
    let stored = h.engine.find(&local.id).unwrap().unwrap();
    assert!(stored.deleted);
    assert!(h.engine.list_active("2025-03").unwrap().is_empty());

    // Once delivered, the remote row is a tombstone too.
    h.gateway.heal_record(&local.id);
    completed(h.engine.tick().await);
    assert!(h.gateway.expense(&local.id).unwrap().deleted);
}

#[tokio::test]
async fn drain_converges_to_failing_subset_without_duplicate_delivery() {
    let h = harness();
    let a = h.engine.add_expense(draft("A", "1.00")).unwrap();
    let b = h.engine.add_expense(draft("B", "2.00")).unwrap();
    let c = h.engine.add_expense(draft("C", "3.00")).unwrap();
    h.gateway.fail_record(b.id.clone());

    let report = completed(h.engine.tick().await);
    let drain = report.drain.unwrap();
    assert_eq!(drain.flushed, 2);
    assert_eq!(drain.remaining, 1);
    assert_eq!(drain.failures[0].record_id, b.id);

    let pending = h.engine.pending_ops().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].record_id(), b.id);

    completed(h.engine.tick().await);
    completed(h.engine.tick().await);
    assert_eq!(h.engine.pending_ops().unwrap()[0].attempts, 3);
    assert_eq!(h.gateway.delivered_op_ids().len(), 2);

    h.gateway.heal_record(&b.id);
    completed(h.engine.tick().await);
    assert!(h.engine.pending_ops().unwrap().is_empty());

    let mut delivered = h.gateway.delivered_op_ids();
    assert_eq!(delivered.len(), 3);
    delivered.sort();
    delivered.dedup();
    assert_eq!(delivered.len(), 3);
    for record in [&a, &b, &c] {
        assert!(h.gateway.expense(&record.id).is_some());
    }
}

#[tokio::test]
async fn operations_enqueued_in_order_keep_their_order() {
    let h = harness();
    h.gateway.set_online(false);
    let first = h.engine.add_expense(draft("First", "1.00")).unwrap();
    h.clock.advance(Duration::seconds(1));
    let second = h.engine.add_expense(draft("Second", "2.00")).unwrap();
    h.clock.advance(Duration::seconds(1));
    h.engine
        .remove_expense(&first.month_key, &first.id)
        .unwrap();

    completed(h.engine.tick().await);
    let ids: Vec<String> = h
        .engine
        .pending_ops()
        .unwrap()
        .iter()
        .map(|op| op.record_id().to_string())
        .collect();
    assert_eq!(ids, vec![first.id.clone(), second.id.clone(), first.id.clone()]);
}

#[tokio::test]
async fn cursor_tracks_max_pulled_timestamp_and_never_regresses() {
    let h = harness();
    let seed = draft("Seed", "1.00").into_expense(t0());
    for (n, offset) in [1, 3, 2].into_iter().enumerate() {
        let mut row = seed.clone();
        row.id = format!("remote-{}", n);
        row.updated_at = t0() + Duration::seconds(offset);
        h.gateway.put_expense(&row);
    }

    let report = completed(h.engine.tick().await);
    assert_eq!(report.pull.unwrap().applied, 3);
    assert_eq!(h.engine.cursor().unwrap(), Some(t0() + Duration::seconds(3)));

    // A late row older than the watermark is never pulled.
    let mut late = seed.clone();
    late.id = "remote-late".to_string();
    late.updated_at = t0() + Duration::seconds(2);
    h.gateway.put_expense(&late);

    let report = completed(h.engine.tick().await);
    assert_eq!(report.pull.unwrap().pulled, 0);
    assert_eq!(h.engine.cursor().unwrap(), Some(t0() + Duration::seconds(3)));
    assert!(h.engine.find("remote-late").unwrap().is_none());
}

#[tokio::test]
async fn malformed_rows_are_skipped_without_aborting_the_page() {
    let h = harness();
    h.gateway.put_row(RemoteExpenseRow {
        id: None,
        updated_at: Some("2025-03-14T09:30:01.000Z".to_string()),
        ..RemoteExpenseRow::default()
    });
    h.gateway.put_row(RemoteExpenseRow {
        id: Some("bad-date".to_string()),
        date: Some("14/03/2025".to_string()),
        amount: Some(serde_json::json!(5)),
        updated_at: Some("2025-03-14T09:30:02.000Z".to_string()),
        ..RemoteExpenseRow::default()
    });
    let good = draft("Good", "9.00").into_expense(t0() + Duration::seconds(3));
    h.gateway.put_expense(&good);

    let report = completed(h.engine.tick().await);
    let pull = report.pull.unwrap();
    assert_eq!(pull.pulled, 3);
    assert_eq!(pull.rejected, 2);
    assert_eq!(pull.applied, 1);
    assert_eq!(report.errors.len(), 2);
    assert_eq!(h.engine.find(&good.id).unwrap(), Some(good));
    assert_eq!(h.engine.cursor().unwrap(), Some(t0() + Duration::seconds(3)));
}

#[tokio::test]
async fn failed_merge_write_halts_page_and_keeps_cursor() {
    let h = harness();
    let remote = draft("Remote", "4.00").into_expense(t0());
    h.gateway.put_expense(&remote);

    h.adapter.fail_writes(true);
    let report = completed(h.engine.tick().await);
    let pull = report.pull.unwrap();
    assert!(pull.halted);
    assert_eq!(pull.applied, 0);
    assert_eq!(h.engine.cursor().unwrap(), None);
    assert!(h.engine.find(&remote.id).unwrap().is_none());

    h.adapter.fail_writes(false);
    let report = completed(h.engine.tick().await);
    assert_eq!(report.pull.unwrap().applied, 1);
    assert_eq!(h.engine.cursor().unwrap(), Some(t0()));
}

#[tokio::test]
async fn halted_page_repulls_rows_sharing_the_failed_timestamp() {
    let h = harness();
    let earlier = draft("Earlier", "1.00").into_expense(t0() + Duration::seconds(2));
    let first = draft("First", "2.00").into_expense(t0() + Duration::seconds(5));
    let second = draft("Second", "3.00").into_expense(t0() + Duration::seconds(5));
    for expense in [&earlier, &first, &second] {
        h.gateway.put_expense(expense);
    }

    // Two merges persist, the third record store write fails; cursor writes succeed.
    h.adapter.fail_key_writes_after(keys::RECORD_STORE, 2);
    let report = completed(h.engine.tick().await);
    let pull = report.pull.unwrap();
    assert!(pull.halted);
    assert_eq!(pull.applied, 2);
    assert_eq!(h.engine.cursor().unwrap(), Some(t0() + Duration::seconds(2)));

    h.adapter.fail_writes(false);
    let report = completed(h.engine.tick().await);
    let pull = report.pull.unwrap();
    assert!(!pull.halted);
    assert_eq!(pull.pulled, 2);
    assert_eq!(pull.applied, 1);
    assert_eq!(pull.ignored, 1);
    for expense in [&earlier, &first, &second] {
        assert!(h.engine.find(&expense.id).unwrap().is_some());
    }
    assert_eq!(h.engine.cursor().unwrap(), Some(t0() + Duration::seconds(5)));
}

#[tokio::test]
async fn failed_undo_after_enqueue_failure_is_reported_as_unqueued() {
    let h = harness();
    // The store write lands; the enqueue and the undo both fail.
    h.adapter.fail_writes_after(1);

    let err = h.engine.add_expense(draft("Stranded", "9.00")).unwrap_err();
    let record_id = match err {
        SyncError::UnqueuedChange { record_id, .. } => record_id,
        other => panic!("expected an unqueued change, got {other:?}"),
    };
    assert_eq!(h.engine.find(&record_id).unwrap().unwrap().vendor, "Stranded");
    assert!(h.engine.pending_ops().unwrap().is_empty());
}

#[tokio::test]
async fn local_write_failure_is_surfaced_and_leaves_no_trace() {
    let h = harness();
    h.adapter.fail_writes(true);

    let err = h.engine.add_expense(draft("Lost", "1.00")).unwrap_err();
    assert!(matches!(err, SyncError::Persistence(_)));
    assert!(h.engine.list_active("2025-03").unwrap().is_empty());
    assert!(h.engine.pending_ops().unwrap().is_empty());
}

#[tokio::test]
async fn removing_unknown_record_queues_delete_marker() {
    let h = harness();
    let removed = h.engine.remove_expense("2025-03", "never-seen").unwrap();
    assert!(removed.is_none());

    let pending = h.engine.pending_ops().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind(), OpKind::Delete);
    assert_eq!(pending[0].month_key(), "2025-03");

    completed(h.engine.tick().await);
    assert!(h.engine.pending_ops().unwrap().is_empty());
}

#[tokio::test]
async fn delete_marker_tombstones_existing_remote_row() {
    let h = harness();
    let remote = draft("Elsewhere", "6.00").into_expense(t0() - Duration::hours(1));
    h.gateway.put_expense(&remote);

    // Queued before this device ever pulled the record.
    h.engine.remove_expense(&remote.month_key, &remote.id).unwrap();
    let report = completed(h.engine.tick().await);
    assert_eq!(report.drain.unwrap().flushed, 1);

    let row = h.gateway.expense(&remote.id).unwrap();
    assert!(row.deleted);
    assert_eq!(row.updated_at, t0());
    // The pulled tombstone lands locally and stays out of listings.
    assert!(h.engine.find(&remote.id).unwrap().unwrap().deleted);
    assert!(h.engine.list_active("2025-03").unwrap().is_empty());
}

#[tokio::test]
async fn update_moves_record_between_months() {
    let h = harness();
    let created = h.engine.add_expense(draft("Hotel", "220.00")).unwrap();

    let mut edited = created.clone();
    edited.date = day(2025, 4, 2);
    edited.amount = dec("240.00");
    let updated = h.engine.update_expense(edited).unwrap();

    assert_eq!(updated.month_key, "2025-04");
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at > created.updated_at);
    assert!(h.engine.list_active("2025-03").unwrap().is_empty());
    assert_eq!(h.engine.list_active("2025-04").unwrap(), vec![updated.clone()]);
    assert_eq!(h.engine.pending_ops().unwrap().len(), 2);

    let tombstone = h
        .engine
        .remove_expense(&updated.month_key, &updated.id)
        .unwrap()
        .unwrap();
    let err = h.engine.update_expense(tombstone).unwrap_err();
    assert!(matches!(err, SyncError::RecordNotFound(_, _)));
}

#[tokio::test]
async fn quick_entry_updates_single_record_per_category() {
    let h = harness();
    let first = h
        .engine
        .upsert_monthly_quick("2025-03", ExpenseCategory::Ads, dec("300"))
        .unwrap();
    assert_eq!(first.date, day(2025, 3, 14));
    assert_eq!(first.vendor, "ADS");

    h.clock.advance(Duration::minutes(5));
    let second = h
        .engine
        .upsert_monthly_quick("2025-03", ExpenseCategory::Ads, dec("450"))
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.amount, dec("450"));

    let other_month = h
        .engine
        .upsert_monthly_quick("2025-01", ExpenseCategory::Ads, dec("10"))
        .unwrap();
    assert_eq!(other_month.date, day(2025, 1, 1));

    assert_eq!(h.engine.list_active("2025-03").unwrap().len(), 1);
    assert_eq!(
        h.engine.month_total("2025-03").unwrap().get("USD"),
        Some(&dec("450"))
    );
    assert!(h.engine.upsert_monthly_quick("2025-13", ExpenseCategory::Ads, dec("1")).is_err());
}

#[tokio::test]
async fn imported_receipt_becomes_email_expense() {
    let h = harness();
    let mut candidate = ReceiptCandidate {
        id: "cand-1".to_string(),
        month_key: "2025-03".to_string(),
        provider: ReceiptProvider::Gmail,
        message_id: "msg-42".to_string(),
        vendor: "GitHub".to_string(),
        amount: dec("4.00"),
        currency: "USD".to_string(),
        date: day(2025, 3, 2),
        subject: Some("Your GitHub receipt".to_string()),
        from: Some("billing@github.com".to_string()),
        status: CandidateStatus::New,
        created_at: t0(),
        updated_at: t0(),
    };

    let imported = h
        .engine
        .import_receipt(&candidate, ExpenseCategory::Subscriptions)
        .unwrap();
    assert_eq!(imported.source, ExpenseSource::Email);
    assert_eq!(imported.category, ExpenseCategory::Subscriptions);
    assert_eq!(imported.provenance.as_ref().unwrap().provider, ReceiptProvider::Gmail);
    assert_eq!(h.engine.pending_ops().unwrap().len(), 1);

    candidate.status = CandidateStatus::Imported;
    assert!(matches!(
        h.engine.import_receipt(&candidate, ExpenseCategory::Other),
        Err(SyncError::InvalidRecord(_))
    ));
}

#[tokio::test]
async fn exponential_backoff_defers_until_delay_elapsed() {
    let h = harness_with(SyncConfig::default().backoff(BackoffPolicy::exponential(1_000, 60_000)));
    h.engine.add_expense(draft("Retry", "1.00")).unwrap();

    h.gateway.set_online(false);
    completed(h.engine.tick().await);
    h.gateway.set_online(true);

    let report = completed(h.engine.tick().await);
    let drain = report.drain.unwrap();
    assert_eq!(drain.deferred, 1);
    assert_eq!(drain.remaining, 1);

    h.clock.advance(Duration::seconds(1));
    let report = completed(h.engine.tick().await);
    assert_eq!(report.drain.unwrap().flushed, 1);
    assert!(h.engine.pending_ops().unwrap().is_empty());
}

#[tokio::test]
async fn backfill_pages_until_short_page() {
    let h = harness_with(SyncConfig::default().pull_page_size(2));
    let seed = draft("Paged", "1.00").into_expense(t0());
    for n in 0..5 {
        let mut row = seed.clone();
        row.id = format!("page-{}", n);
        row.updated_at = t0() + Duration::seconds(n);
        h.gateway.put_expense(&row);
    }

    let pages = h.engine.backfill(10).await.unwrap();
    let sizes: Vec<usize> = pages.iter().map(|page| page.pulled).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(h.engine.list_active("2025-03").unwrap().len(), 5);
    assert_eq!(h.engine.cursor().unwrap(), Some(t0() + Duration::seconds(4)));

    h.gateway.set_online(false);
    assert!(matches!(
        h.engine.backfill(1).await,
        Err(SyncError::Remote(GatewayError::Offline))
    ));
}

/// Gateway whose pulls take a while, to hold a tick open.
struct SlowGateway {
    inner: MemoryGateway,
    delay: std::time::Duration,
}

#[async_trait]
impl RemoteGateway for SlowGateway {
    async fn send(&self, op: &OutboxOp) -> Result<(), GatewayError> {
        self.inner.send(op).await
    }

    async fn pull_since(
        &self,
        cursor: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RemoteExpenseRow>, GatewayError> {
        tokio::time::sleep(self.delay).await;
        self.inner.pull_since(cursor, limit).await
    }
}

#[tokio::test]
async fn overlapping_tick_is_skipped() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(t0()));
    let gateway = Arc::new(SlowGateway {
        inner: MemoryGateway::new(clock.clone()),
        delay: std::time::Duration::from_millis(200),
    });
    let engine = SyncEngine::open(
        Arc::new(MemoryAdapter::new()),
        gateway,
        clock,
        SyncConfig::default(),
    )
    .unwrap();

    let (first, second) = tokio::join!(engine.tick(), async {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        engine.tick().await
    });
    assert!(!first.is_skipped());
    assert!(second.is_skipped());

    // The gate is released once the first tick returns.
    assert!(!engine.tick().await.is_skipped());
}

/// Gateway that accepts uploads but answers every pull with the given status.
struct RefusingGateway {
    inner: MemoryGateway,
    status: u16,
}

#[async_trait]
impl RemoteGateway for RefusingGateway {
    async fn send(&self, op: &OutboxOp) -> Result<(), GatewayError> {
        self.inner.send(op).await
    }

    async fn pull_since(
        &self,
        _cursor: Option<DateTime<Utc>>,
        _limit: usize,
    ) -> Result<Vec<RemoteExpenseRow>, GatewayError> {
        Err(GatewayError::Http {
            status: self.status,
            body: "denied".to_string(),
        })
    }
}

fn engine_refused_with(status: u16) -> SyncEngine {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(t0()));
    let gateway = Arc::new(RefusingGateway {
        inner: MemoryGateway::new(clock.clone()),
        status,
    });
    SyncEngine::open(
        Arc::new(MemoryAdapter::new()),
        gateway,
        clock,
        SyncConfig::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn rejected_credentials_are_flagged_on_the_report() {
    let engine = engine_refused_with(401);
    engine.add_expense(draft("Figma", "15.00")).unwrap();

    let report = completed(engine.tick().await);
    assert!(report.remote_refused);
    assert_eq!(report.drain.as_ref().unwrap().flushed, 1);
    assert!(report.pull.is_none());
    assert!(report.errors.iter().any(|e| e.starts_with("pull refused:")));
    assert!(report.summary().contains("remote refused"));
}

#[tokio::test]
async fn ordinary_http_failure_is_not_flagged_as_refused() {
    let engine = engine_refused_with(503);

    let report = completed(engine.tick().await);
    assert!(!report.remote_refused);
    assert!(report.errors.iter().any(|e| e.starts_with("pull:")));
}

#[tokio::test]
async fn state_survives_restart_with_file_adapter() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(t0()));
    let gateway = Arc::new(MemoryGateway::new(clock.clone()));
    gateway.set_online(false);

    for codec in [SnapshotCodec::Json, SnapshotCodec::MessagePack] {
        let data_dir = dir.path().join(codec.as_str());
        let config = SyncConfig::default().codec(codec).data_dir(&data_dir);

        let (kept, removed) = {
            let adapter: Arc<dyn PersistenceAdapter> =
                Arc::new(FileAdapter::open(&data_dir).unwrap());
            let engine =
                SyncEngine::open(adapter, gateway.clone(), clock.clone(), config.clone()).unwrap();
            let kept = engine.add_expense(draft("Kept", "10.00")).unwrap();
            let removed = engine.add_expense(draft("Removed", "5.00")).unwrap();
            engine.remove_expense(&removed.month_key, &removed.id).unwrap();
            (kept, removed)
        };

        let adapter: Arc<dyn PersistenceAdapter> = Arc::new(FileAdapter::open(&data_dir).unwrap());
        let engine = SyncEngine::open(adapter, gateway.clone(), clock.clone(), config).unwrap();
        assert_eq!(engine.list_active("2025-03").unwrap(), vec![kept.clone()]);
        assert!(engine.find(&removed.id).unwrap().unwrap().deleted);
        assert_eq!(engine.pending_ops().unwrap().len(), 3);
        assert_eq!(engine.status().unwrap().records, 2);
    }
}

#[test]
fn replaying_a_pulled_page_is_idempotent() {
    let mut store = RecordStore::open(Arc::new(MemoryAdapter::new()), SnapshotCodec::Json).unwrap();
    let page: Vec<Expense> = (0..3)
        .map(|n| draft(&format!("Vendor {}", n), "3.00").into_expense(t0() + Duration::seconds(n)))
        .collect();

    for record in &page {
        assert_eq!(store.merge_incoming(record.clone()).unwrap(), MergeDecision::Apply);
    }
    let after_first = store.list_all("2025-03");

    for record in &page {
        assert_eq!(store.merge_incoming(record.clone()).unwrap(), MergeDecision::Ignore);
    }
    assert_eq!(store.list_all("2025-03"), after_first);
}
