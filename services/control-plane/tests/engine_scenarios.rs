//! Dispatcher, admission and executor behavior end to end

mod common;

use async_trait::async_trait;
use bot_control_plane::{
    bots::BotRegistry,
    engine::{BotExecutor, Dispatcher},
    models::{BotType, ExecutionConfig, ExecutionFilter, ExecutionRecord, ExecutionStatus},
    observability::metrics,
    store::{ExecutionStore, MemoryStore, StoreError},
    transactions::backoff::TERMINAL_WRITE_ATTEMPTS,
    EngineError, MetricsCollector,
};
use chrono::{DateTime, Utc};
use common::{harness, scripted_registry, ScriptedBot, MINT};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Serves one outdated read: the first lookup reports the record as RUNNING
/// whatever the store holds, as if the run finished right after the read.
struct StaleFirstRead {
    inner: Arc<MemoryStore>,
    stale: AtomicBool,
}

#[async_trait]
impl ExecutionStore for StaleFirstRead {
    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        self.inner.insert_execution(record).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRecord>, StoreError> {
        let mut record = self.inner.get_execution(id).await?;
        if self.stale.swap(false, Ordering::SeqCst) {
            if let Some(record) = record.as_mut() {
                record.status = ExecutionStatus::Running;
            }
        }
        Ok(record)
    }

    async fn update_execution(&self, record: &ExecutionRecord) -> Result<bool, StoreError> {
        self.inner.update_execution(record).await
    }

    async fn finish_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.finish_execution(id, status, message, at).await
    }

    async fn count_active(&self) -> Result<u64, StoreError> {
        self.inner.count_active().await
    }

    async fn list_active(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        self.inner.list_active().await
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        self.inner.list_executions(filter).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_admission_rejects_beyond_limit_then_frees_slot() {
    let h = harness(scripted_registry(ScriptedBot::new().slow(Duration::from_secs(30))), 2).await;

    let first = h
        .dispatcher
        .start_execution(h.start_request(json!({}), 1, 0))
        .await
        .unwrap();
    let second = h
        .dispatcher
        .start_execution(h.start_request(json!({}), 1, 0))
        .await
        .unwrap();

    let err = h
        .dispatcher
        .start_execution(h.start_request(json!({}), 1, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AdmissionRejected { limit: 2 }));
    assert!(err.to_string().contains("Maximum concurrent bots reached"));

    // The rejected call left nothing behind
    let records = h
        .dispatcher
        .list_executions(&ExecutionFilter::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(h.metrics.get_counter(metrics::EXECUTION_REJECTED).await, 1);

    assert_eq!(h.wait_for_terminal(first).await.status, ExecutionStatus::Completed);
    assert_eq!(h.wait_for_terminal(second).await.status, ExecutionStatus::Completed);

    let third = h
        .dispatcher
        .start_execution(h.start_request(json!({}), 1, 0))
        .await;
    assert!(third.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_never_exceed_limit() {
    let h = harness(scripted_registry(ScriptedBot::new().slow(Duration::from_secs(60))), 2).await;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let dispatcher = h.dispatcher.clone();
        let request = h.start_request(json!({}), 1, 0);
        handles.push(tokio::spawn(async move {
            dispatcher.start_execution(request).await
        }));
    }

    let mut admitted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(EngineError::AdmissionRejected { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(admitted, 2);
    assert_eq!(rejected, 4);
    assert_eq!(h.store.count_active().await.unwrap(), 2);
}

#[tokio::test]
async fn test_partial_failure_marks_execution_failed() {
    let h = harness(scripted_registry(ScriptedBot::new().failing_on(&[2])), 5).await;

    let id = h
        .dispatcher
        .start_execution(h.start_request(json!({}), 3, 0))
        .await
        .unwrap();
    let record = h.wait_for_terminal(id).await;

    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.total_cycles, 3);
    assert_eq!(record.successful_cycles, 2);
    assert_eq!(record.failed_cycles, 1);
    assert_eq!(record.errors.len(), 1);
    assert_eq!(record.errors[0].cycle, 2);
    assert!(record.errors[0].message.contains("cycle 2 failed"));
    assert_eq!(record.error_message.as_deref(), Some("1 of 3 cycles failed"));
    assert_eq!(record.bot_specific_results, Some(json!({ "succeeded": 2 })));
    assert!(record.started_at.is_some());
    assert!(record.completed_at.is_some());
    assert!(record.execution_duration_ms.is_some());
}

#[tokio::test]
async fn test_all_cycles_succeeding_completes() {
    let h = harness(scripted_registry(ScriptedBot::new()), 5).await;

    let id = h
        .dispatcher
        .start_execution(h.start_request(json!({}), 4, 0))
        .await
        .unwrap();
    let record = h.wait_for_terminal(id).await;

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.total_cycles, 4);
    assert_eq!(record.successful_cycles, 4);
    assert!(record.errors.is_empty());
    assert!(record.error_message.is_none());
    assert_eq!(h.metrics.get_counter(metrics::EXECUTION_COMPLETED).await, 1);
}

#[tokio::test]
async fn test_invalid_params_are_rejected_before_any_record() {
    let bot = ScriptedBot::new();
    let calls = bot.calls.clone();
    let h = harness(scripted_registry(bot), 5).await;

    let err = h
        .dispatcher
        .start_execution(h.start_request(json!({ "reject": true }), 3, 0))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Validation(msg) if msg.contains("params rejected")));
    assert!(h
        .dispatcher
        .list_executions(&ExecutionFilter::default())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_config_out_of_bounds_is_validation_error() {
    let h = harness(scripted_registry(ScriptedBot::new()), 5).await;

    let err = h
        .dispatcher
        .start_execution(h.start_request(json!({}), 0, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_unknown_wallet_is_not_found() {
    let h = harness(scripted_registry(ScriptedBot::new()), 5).await;

    let mut request = h.start_request(json!({}), 1, 0);
    request.wallet_id = Uuid::new_v4();
    let err = h.dispatcher.start_execution(request).await.unwrap_err();

    assert!(matches!(err, EngineError::NotFound { entity: "Wallet", .. }));
    assert_eq!(h.store.count_active().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unregistered_bot_type_is_validation_error() {
    let h = harness(scripted_registry(ScriptedBot::new()), 5).await;

    let mut request = h.start_request(json!({}), 1, 0);
    request.bot_type = BotType::Accumulator;
    let err = h.dispatcher.start_execution(request).await.unwrap_err();

    assert!(matches!(err, EngineError::Validation(msg) if msg.contains("accumulator")));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_before_next_cycle() {
    let h = harness(scripted_registry(ScriptedBot::new()), 5).await;

    let id = h
        .dispatcher
        .start_execution(h.start_request(json!({}), 5, 10))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(15)).await;
    let at_request = h.dispatcher.cancel_execution(id).await.unwrap();
    assert!(at_request.status.is_active());

    let record = h.wait_for_terminal(id).await;
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert!(record.total_cycles < 5);
    assert_eq!(
        record.successful_cycles + record.failed_cycles,
        record.total_cycles
    );

    let err = h.dispatcher.cancel_execution(id).await.unwrap_err();
    assert!(matches!(err, EngineError::StateConflict(_)));
}

#[tokio::test]
async fn test_cancel_after_completion_keeps_terminal_record() {
    let h = harness(scripted_registry(ScriptedBot::new()), 5).await;
    let id = h
        .dispatcher
        .start_execution(h.start_request(json!({}), 2, 0))
        .await
        .unwrap();
    assert_eq!(h.wait_for_terminal(id).await.status, ExecutionStatus::Completed);

    // A second dispatcher that does not own the run reads an outdated RUNNING
    let stale = Arc::new(StaleFirstRead {
        inner: h.store.clone(),
        stale: AtomicBool::new(true),
    });
    let other = Dispatcher::new(
        stale,
        h.store.clone(),
        Arc::new(BotRegistry::new()),
        Arc::new(BotExecutor::new(h.gateway.clone(), MetricsCollector::new())),
        5,
        MetricsCollector::new(),
    );

    let err = other.cancel_execution(id).await.unwrap_err();
    assert!(matches!(err, EngineError::StateConflict(msg) if msg.contains("COMPLETED")));

    let stored = h.store.get_execution(id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Completed);
    assert_eq!(stored.total_cycles, 2);
    assert_eq!(stored.successful_cycles, 2);
}

#[tokio::test]
async fn test_cancel_of_unowned_active_record() {
    let h = harness(BotRegistry::with_defaults(), 5).await;
    let mut orphan = ExecutionRecord::new_pending(
        BotType::Volume,
        json!({}),
        h.wallet.id,
        ExecutionConfig::default(),
        None,
    );
    orphan.mark_running();
    h.store.insert_execution(&orphan).await.unwrap();

    let record = h.dispatcher.cancel_execution(orphan.id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert!(record.completed_at.is_some());
    assert_eq!(h.store.count_active().await.unwrap(), 0);
    assert_eq!(h.metrics.get_counter(metrics::EXECUTION_CANCELLED).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_final_write_is_retried() {
    let h = harness(scripted_registry(ScriptedBot::new().slow(Duration::from_secs(10))), 1).await;
    let id = h
        .dispatcher
        .start_execution(h.start_request(json!({}), 1, 0))
        .await
        .unwrap();
    h.wait_for_running(id).await;
    h.store.fail_next_updates(1);

    let record = h.wait_for_terminal(id).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.successful_cycles, 1);
    assert_eq!(h.metrics.get_counter(metrics::EXECUTION_COMPLETED).await, 1);

    // The slot is free again
    assert!(h
        .dispatcher
        .start_execution(h.start_request(json!({}), 1, 0))
        .await
        .is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_unwritable_result_still_ends_failed() {
    let h = harness(scripted_registry(ScriptedBot::new().slow(Duration::from_secs(10))), 1).await;
    let id = h
        .dispatcher
        .start_execution(h.start_request(json!({}), 1, 0))
        .await
        .unwrap();
    h.wait_for_running(id).await;
    h.store.fail_next_updates(TERMINAL_WRITE_ATTEMPTS);

    let record = h.wait_for_terminal(id).await;
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("Failed to persist final execution state")
    );
    assert_eq!(h.store.count_active().await.unwrap(), 0);
    assert_eq!(h.metrics.get_counter(metrics::EXECUTION_FAILED).await, 1);
    assert_eq!(h.metrics.get_counter(metrics::EXECUTION_COMPLETED).await, 0);

    assert!(h
        .dispatcher
        .start_execution(h.start_request(json!({}), 1, 0))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_cancel_unknown_execution_is_not_found() {
    let h = harness(scripted_registry(ScriptedBot::new()), 5).await;
    let err = h.dispatcher.cancel_execution(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn test_panic_in_run_is_recorded_as_failed() {
    let h = harness(scripted_registry(ScriptedBot::new().panicking_in_aggregate()), 5).await;

    let id = h
        .dispatcher
        .start_execution(h.start_request(json!({}), 2, 0))
        .await
        .unwrap();
    let record = h.wait_for_terminal(id).await;

    assert_eq!(record.status, ExecutionStatus::Failed);
    let message = record.error_message.unwrap();
    assert!(message.contains("panicked"), "message was {}", message);
    assert!(message.contains("aggregate blew up"));
}

#[tokio::test]
async fn test_store_failure_marking_running_fails_execution() {
    let bot = ScriptedBot::new();
    let calls = bot.calls.clone();
    let h = harness(scripted_registry(bot), 5).await;
    h.store.fail_next_updates(1);

    let id = h
        .dispatcher
        .start_execution(h.start_request(json!({}), 2, 0))
        .await
        .unwrap();
    let record = h.wait_for_terminal(id).await;

    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record
        .error_message
        .unwrap()
        .starts_with("Failed to mark execution running"));
    assert_eq!(record.total_cycles, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_orphaned_records_fail_on_recovery() {
    let h = harness(BotRegistry::with_defaults(), 5).await;

    let mut orphan = ExecutionRecord::new_pending(
        BotType::Volume,
        json!({}),
        h.wallet.id,
        ExecutionConfig::default(),
        None,
    );
    orphan.mark_running();
    h.store.insert_execution(&orphan).await.unwrap();

    assert_eq!(h.dispatcher.recover_orphans().await.unwrap(), 1);

    let record = h.dispatcher.get_status(orphan.id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("interrupted by restart"));
    assert_eq!(h.store.count_active().await.unwrap(), 0);
}

#[tokio::test]
async fn test_volume_bot_trades_on_paper() {
    let h = harness(BotRegistry::with_defaults(), 5).await;

    let id = h
        .dispatcher
        .start_execution(h.start_request(
            json!({ "mint": MINT, "buy_amount_sol": "0.5", "wait_blocks": 1 }),
            2,
            0,
        ))
        .await
        .unwrap();
    let record = h.wait_for_terminal(id).await;

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.successful_cycles, 2);

    let results = record.bot_specific_results.unwrap();
    assert_eq!(results["cycles"], json!(2));
    assert_eq!(results["signatures"], json!(4));
    assert_eq!(h.gateway.call_count("buy"), 2);
    assert_eq!(h.gateway.call_count("sell"), 2);
    // Fees make every round trip a loss
    assert!(h.gateway.balance_of(common::WALLET_KEY) < 10 * common::ONE_SOL);
}

#[tokio::test]
async fn test_accumulator_failure_is_per_cycle() {
    let h = harness(BotRegistry::with_defaults(), 5).await;
    h.gateway.fail_next(
        "buy",
        chain_gateway::GatewayError::transport("buy", "connection reset"),
    );

    let mut request = h.start_request(
        json!({ "mint": MINT, "amount_per_cycle_sol": "0.1" }),
        3,
        0,
    );
    request.bot_type = BotType::Accumulator;
    let id = h.dispatcher.start_execution(request).await.unwrap();
    let record = h.wait_for_terminal(id).await;

    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.total_cycles, 3);
    assert_eq!(record.failed_cycles, 1);
    assert_eq!(record.errors[0].cycle, 0);
    assert_eq!(record.bot_specific_results.unwrap()["purchases"], json!(2));
}
