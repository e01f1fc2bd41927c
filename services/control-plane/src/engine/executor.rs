//! Cycle engine
//!
//! Runs `repeat_count` cycles of a bot strictly one after another. A failing
//! cycle is recorded and the run carries on with the next one; only a
//! parameter validation failure aborts the run before it starts. Each cycle
//! executes in its own task so a panicking bot costs one cycle, not the run.

use chain_gateway::BlockchainGateway;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::panic_message;
use crate::bots::{BotDescriptor, CycleContext, CycleResult};
use crate::error::{CycleError, EngineError};
use crate::models::ExecutionConfig;
use crate::observability::{metrics, MetricsCollector};

/// What to run
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub execution_id: Uuid,
    /// Public key of the executing wallet
    pub wallet: String,
    pub params: Value,
    pub config: ExecutionConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorResult {
    /// No cycle failed
    pub success: bool,
    /// Cycles attempted, less than `repeat_count` only when cancelled
    pub total_cycles: u32,
    pub successful_cycles: u32,
    pub failed_cycles: u32,
    pub errors: Vec<CycleError>,
    pub bot_specific_results: Value,
    pub duration: Duration,
    pub cancelled: bool,
}

pub struct BotExecutor {
    gateway: Arc<dyn BlockchainGateway>,
    metrics: MetricsCollector,
}

impl BotExecutor {
    pub fn new(gateway: Arc<dyn BlockchainGateway>, metrics: MetricsCollector) -> Self {
        Self { gateway, metrics }
    }

    pub async fn run(
        &self,
        descriptor: &Arc<dyn BotDescriptor>,
        spec: &RunSpec,
        cancel: &CancellationToken,
    ) -> Result<ExecutorResult, EngineError> {
        descriptor.validate(&spec.params)?;

        let started = Instant::now();
        let repeat = spec.config.repeat_count;
        let interval = Duration::from_secs(spec.config.interval_seconds);

        let mut results: Vec<CycleResult> = Vec::with_capacity(repeat as usize);
        let mut errors = Vec::new();
        let mut total = 0u32;
        let mut succeeded = 0u32;
        let mut failed = 0u32;
        let mut cancelled = false;

        for cycle in 0..repeat {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            total += 1;

            let outcome = match descriptor.prepare_cycle(&spec.params, cycle) {
                Ok(cycle_params) => {
                    debug!(execution_id = %spec.execution_id, cycle, params = %cycle_params, "Cycle starting");
                    let ctx = CycleContext {
                        execution_id: spec.execution_id,
                        cycle,
                        wallet: spec.wallet.clone(),
                        gateway: self.gateway.clone(),
                    };
                    self.run_cycle(descriptor.clone(), ctx, cycle_params).await
                }
                Err(e) => Err(format!("prepare failed: {}", e)),
            };

            match outcome {
                Ok(result) if result.success => {
                    succeeded += 1;
                    self.metrics.increment(metrics::CYCLE_SUCCEEDED, 1).await;
                    results.push(result);
                }
                Ok(result) => {
                    failed += 1;
                    let message = result
                        .error
                        .clone()
                        .unwrap_or_else(|| "cycle reported failure".to_string());
                    warn!(execution_id = %spec.execution_id, cycle, "Cycle failed: {}", message);
                    self.metrics.increment(metrics::CYCLE_FAILED, 1).await;
                    errors.push(CycleError::new(cycle, message));
                    results.push(result);
                }
                Err(message) => {
                    failed += 1;
                    warn!(execution_id = %spec.execution_id, cycle, "Cycle failed: {}", message);
                    self.metrics.increment(metrics::CYCLE_FAILED, 1).await;
                    errors.push(CycleError::new(cycle, message));
                }
            }

            if cycle + 1 < repeat && !interval.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    _ = sleep(interval) => {}
                }
            }
        }

        if cancelled {
            info!(execution_id = %spec.execution_id, cycles = total, "Cycle loop cancelled");
        }

        let bot_specific_results = descriptor.aggregate(&results);

        Ok(ExecutorResult {
            success: failed == 0,
            total_cycles: total,
            successful_cycles: succeeded,
            failed_cycles: failed,
            errors,
            bot_specific_results,
            duration: started.elapsed(),
            cancelled,
        })
    }

    /// Execute one cycle in its own task, folding errors and panics into `Err`
    async fn run_cycle(
        &self,
        descriptor: Arc<dyn BotDescriptor>,
        ctx: CycleContext,
        cycle_params: Value,
    ) -> Result<CycleResult, String> {
        let handle =
            tokio::spawn(async move { descriptor.execute_cycle(&ctx, cycle_params).await });

        match handle.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e.to_string()),
            Err(join_err) if join_err.is_panic() => {
                self.metrics.increment(metrics::CYCLE_PANICKED, 1).await;
                Err(format!(
                    "cycle panicked: {}",
                    panic_message(join_err.into_panic())
                ))
            }
            Err(join_err) => Err(format!("cycle task aborted: {}", join_err)),
        }
    }
}
