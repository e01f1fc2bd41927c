//! Async dispatcher
//!
//! Creates the PENDING record, returns its id and drives the run in a
//! background task. Every background outcome ends in a terminal record:
//! executor errors, persistence hiccups and panics all become FAILED,
//! cancellation becomes CANCELLED.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::executor::{BotExecutor, ExecutorResult, RunSpec};
use super::{panic_message, AdmissionController};
use crate::bots::{BotDescriptor, BotRegistry};
use crate::error::EngineError;
use crate::models::{
    BotType, ExecutionConfig, ExecutionFilter, ExecutionRecord, ExecutionStatus,
};
use crate::observability::{metrics, MetricsCollector};
use crate::store::{ExecutionStore, StoreError, WalletDirectory};
use crate::transactions::backoff::{
    retry_with_backoff, terminal_write_backoff, TERMINAL_WRITE_ATTEMPTS,
};

pub const MAX_REPEAT_COUNT: u32 = 1_000;
pub const MAX_INTERVAL_SECONDS: u64 = 86_400;

#[derive(Debug, Clone)]
pub struct StartExecution {
    pub bot_type: BotType,
    pub params: Value,
    pub wallet_id: Uuid,
    pub config: ExecutionConfig,
    pub request_id: Option<String>,
}

type RunningMap = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

pub struct Dispatcher {
    executions: Arc<dyn ExecutionStore>,
    wallets: Arc<dyn WalletDirectory>,
    registry: Arc<BotRegistry>,
    admission: AdmissionController,
    executor: Arc<BotExecutor>,
    metrics: MetricsCollector,
    running: RunningMap,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

fn lock(running: &RunningMap) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
    running.lock().unwrap_or_else(|e| e.into_inner())
}

fn validate_config(config: &ExecutionConfig) -> Result<(), EngineError> {
    if config.repeat_count == 0 || config.repeat_count > MAX_REPEAT_COUNT {
        return Err(EngineError::Validation(format!(
            "repeat_count must be between 1 and {}",
            MAX_REPEAT_COUNT
        )));
    }
    if config.interval_seconds > MAX_INTERVAL_SECONDS {
        return Err(EngineError::Validation(format!(
            "interval_seconds must be at most {}",
            MAX_INTERVAL_SECONDS
        )));
    }
    Ok(())
}

impl Dispatcher {
    pub fn new(
        executions: Arc<dyn ExecutionStore>,
        wallets: Arc<dyn WalletDirectory>,
        registry: Arc<BotRegistry>,
        executor: Arc<BotExecutor>,
        max_concurrent: u64,
        metrics: MetricsCollector,
    ) -> Self {
        let admission = AdmissionController::new(executions.clone(), max_concurrent, metrics.clone());
        Self {
            executions,
            wallets,
            registry,
            admission,
            executor,
            metrics,
            running: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Admit, persist PENDING and launch the run. Returns once the record exists.
    pub async fn start_execution(&self, request: StartExecution) -> Result<Uuid, EngineError> {
        if self.shutdown.is_cancelled() {
            return Err(EngineError::StateConflict(
                "engine is shutting down".to_string(),
            ));
        }

        let descriptor = self.registry.get(request.bot_type).ok_or_else(|| {
            EngineError::Validation(format!("bot type {} is not registered", request.bot_type))
        })?;
        validate_config(&request.config)?;

        let permit = self.admission.request_slot().await?;

        let wallet = self
            .wallets
            .get_wallet(request.wallet_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Wallet", request.wallet_id))?;
        if !wallet.is_active {
            return Err(EngineError::StateConflict(format!(
                "Wallet {} is inactive",
                wallet.id
            )));
        }

        descriptor.validate(&request.params)?;

        let record = ExecutionRecord::new_pending(
            request.bot_type,
            request.params,
            request.wallet_id,
            request.config,
            request.request_id,
        );

        // Owned before it is visible, so a cancel never takes the orphan path
        let cancel = self.shutdown.child_token();
        lock(&self.running).insert(record.id, cancel.clone());
        if let Err(e) = self.executions.insert_execution(&record).await {
            lock(&self.running).remove(&record.id);
            return Err(e.into());
        }
        drop(permit);

        info!(
            execution_id = %record.id,
            bot_type = %record.bot_type,
            wallet_id = %record.wallet_id,
            repeat_count = record.config.repeat_count,
            "Execution created"
        );
        let id = record.id;
        self.spawn_run(record, descriptor, wallet.pubkey, cancel);

        self.metrics.increment(metrics::EXECUTION_STARTED, 1).await;
        let running = self.running_count();
        self.metrics
            .gauge(metrics::ACTIVE_EXECUTIONS, running as f64)
            .await;

        Ok(id)
    }

    fn spawn_run(
        &self,
        record: ExecutionRecord,
        descriptor: Arc<dyn BotDescriptor>,
        wallet: String,
        cancel: CancellationToken,
    ) {
        let id = record.id;

        let run = ExecutionRun {
            store: self.executions.clone(),
            executor: self.executor.clone(),
            metrics: self.metrics.clone(),
            descriptor,
            wallet,
            cancel,
        };
        let worker = tokio::spawn(run.drive(record));

        let store = self.executions.clone();
        let collector = self.metrics.clone();
        let running = self.running.clone();
        self.tracker.spawn(async move {
            let failure = match worker.await {
                Ok(true) => None,
                Ok(false) => Some("Failed to persist final execution state".to_string()),
                Err(join_err) if join_err.is_panic() => Some(format!(
                    "execution task panicked: {}",
                    panic_message(join_err.into_panic())
                )),
                Err(join_err) => Some(format!("execution task aborted: {}", join_err)),
            };
            if let Some(message) = failure {
                error!(execution_id = %id, "{}", message);
                if fail_if_active(store.as_ref(), id, &message).await {
                    collector.increment(metrics::EXECUTION_FAILED, 1).await;
                }
            }
            let remaining = {
                let mut running = lock(&running);
                running.remove(&id);
                running.len()
            };
            collector
                .gauge(metrics::ACTIVE_EXECUTIONS, remaining as f64)
                .await;
        });
    }

    pub async fn get_status(&self, id: Uuid) -> Result<ExecutionRecord, EngineError> {
        self.executions
            .get_execution(id)
            .await?
            .ok_or_else(|| EngineError::not_found("Execution", id))
    }

    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ExecutionRecord>, EngineError> {
        Ok(self.executions.list_executions(filter).await?)
    }

    /// Request early termination. The run stops before its next cycle and
    /// writes CANCELLED itself, the returned record is the state at request time.
    pub async fn cancel_execution(&self, id: Uuid) -> Result<ExecutionRecord, EngineError> {
        let record = self.get_status(id).await?;
        if record.status.is_terminal() {
            return Err(already_finished(&record));
        }

        let token = lock(&self.running).get(&id).cloned();
        if let Some(token) = token {
            token.cancel();
            info!(execution_id = %id, "Cancellation requested");
            return Ok(record);
        }

        // Active in the store but not driven by this process
        let cancelled = self
            .executions
            .finish_execution(
                id,
                ExecutionStatus::Cancelled,
                Some("cancelled while not running in this process".to_string()),
                Utc::now(),
            )
            .await?;
        let current = self.get_status(id).await?;
        if !cancelled {
            return Err(already_finished(&current));
        }

        self.metrics.increment(metrics::EXECUTION_CANCELLED, 1).await;
        info!(execution_id = %id, "Orphaned execution cancelled");
        Ok(current)
    }

    /// Fail records a previous process left active, returns how many
    pub async fn recover_orphans(&self) -> Result<usize, EngineError> {
        let active = self.executions.list_active().await?;
        let mut recovered = 0;

        for record in active {
            if lock(&self.running).contains_key(&record.id) {
                continue;
            }
            let failed = self
                .executions
                .finish_execution(
                    record.id,
                    ExecutionStatus::Failed,
                    Some("interrupted by restart".to_string()),
                    Utc::now(),
                )
                .await?;
            if failed {
                warn!(execution_id = %record.id, "Marked orphaned execution as failed");
                recovered += 1;
            }
        }

        Ok(recovered)
    }

    pub fn running_count(&self) -> usize {
        lock(&self.running).len()
    }

    pub fn max_concurrent(&self) -> u64 {
        self.admission.max_concurrent()
    }

    /// Cancel every run and wait until each has written its terminal state
    pub async fn shutdown(&self) {
        info!("Dispatcher shutting down, {} runs in flight", self.running_count());
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// One background run, owns its record
struct ExecutionRun {
    store: Arc<dyn ExecutionStore>,
    executor: Arc<BotExecutor>,
    metrics: MetricsCollector,
    descriptor: Arc<dyn BotDescriptor>,
    wallet: String,
    cancel: CancellationToken,
}

impl ExecutionRun {
    /// Returns false when the terminal state could not be written
    async fn drive(self, mut record: ExecutionRecord) -> bool {
        let id = record.id;

        if let Err(e) = self.descriptor.validate(&record.params) {
            warn!(execution_id = %id, "Execution params rejected: {}", e);
            record.mark_terminal(ExecutionStatus::Failed, Some(e.to_string()));
            return self.persist_final(&record).await;
        }

        if self.cancel.is_cancelled() {
            record.mark_terminal(ExecutionStatus::Cancelled, None);
            return self.persist_final(&record).await;
        }

        record.mark_running();
        match self.store.update_execution(&record).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(execution_id = %id, "Execution finished elsewhere before it started");
                return true;
            }
            Err(e) => {
                error!(execution_id = %id, "Failed to mark execution running: {}", e);
                record.mark_terminal(
                    ExecutionStatus::Failed,
                    Some(format!("Failed to mark execution running: {}", e)),
                );
                return self.persist_final(&record).await;
            }
        }
        info!(execution_id = %id, "Execution running");

        let spec = RunSpec {
            execution_id: id,
            wallet: self.wallet.clone(),
            params: record.params.clone(),
            config: record.config,
        };

        match self.executor.run(&self.descriptor, &spec, &self.cancel).await {
            Ok(result) => apply_result(&mut record, result),
            Err(e) => record.mark_terminal(ExecutionStatus::Failed, Some(e.to_string())),
        }

        self.persist_final(&record).await
    }

    async fn persist_final(&self, record: &ExecutionRecord) -> bool {
        let store = self.store.as_ref();
        let written = retry_with_backoff(
            terminal_write_backoff(),
            TERMINAL_WRITE_ATTEMPTS,
            "Final execution write",
            move || store.update_execution(record),
        )
        .await;

        match written {
            Ok(true) => {
                info!(
                    execution_id = %record.id,
                    status = %record.status,
                    total = record.total_cycles,
                    successful = record.successful_cycles,
                    failed = record.failed_cycles,
                    "Execution finished"
                );
                let counter = match record.status {
                    ExecutionStatus::Completed => metrics::EXECUTION_COMPLETED,
                    ExecutionStatus::Cancelled => metrics::EXECUTION_CANCELLED,
                    _ => metrics::EXECUTION_FAILED,
                };
                self.metrics.increment(counter, 1).await;
                if let Some(ms) = record.execution_duration_ms {
                    self.metrics
                        .histogram(metrics::EXECUTION_DURATION_MS, ms as f64)
                        .await;
                }
                true
            }
            Ok(false) => {
                warn!(execution_id = %record.id, "Execution already terminal, result dropped");
                true
            }
            Err(e) => {
                error!(
                    execution_id = %record.id,
                    status = %record.status,
                    "Failed to persist final execution state: {}",
                    e
                );
                false
            }
        }
    }
}

fn apply_result(record: &mut ExecutionRecord, result: ExecutorResult) {
    let (status, message) = if result.cancelled {
        (ExecutionStatus::Cancelled, None)
    } else if result.success {
        (ExecutionStatus::Completed, None)
    } else {
        (
            ExecutionStatus::Failed,
            Some(format!(
                "{} of {} cycles failed",
                result.failed_cycles, result.total_cycles
            )),
        )
    };

    record.total_cycles = result.total_cycles;
    record.successful_cycles = result.successful_cycles;
    record.failed_cycles = result.failed_cycles;
    record.execution_duration_ms = Some(result.duration.as_millis() as u64);
    record.bot_specific_results = Some(result.bot_specific_results);
    record.errors = result.errors;
    record.mark_terminal(status, message);
}

fn already_finished(record: &ExecutionRecord) -> EngineError {
    EngineError::StateConflict(format!(
        "Execution {} is already {}",
        record.id, record.status
    ))
}

/// Returns true when this call moved the record to FAILED
async fn fail_if_active(store: &dyn ExecutionStore, id: Uuid, message: &str) -> bool {
    let written: Result<bool, StoreError> = retry_with_backoff(
        terminal_write_backoff(),
        TERMINAL_WRITE_ATTEMPTS,
        "Task failure write",
        move || {
            store.finish_execution(id, ExecutionStatus::Failed, Some(message.to_string()), Utc::now())
        },
    )
    .await;

    match written {
        Ok(failed) => failed,
        Err(e) => {
            error!(execution_id = %id, "Failed to record task failure: {}", e);
            false
        }
    }
}
