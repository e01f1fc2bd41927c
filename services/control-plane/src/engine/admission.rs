//! Admission control
//!
//! The active count lives in the execution store. Count and insert happen
//! under one async mutex: the caller holds the returned permit until the new
//! record is written, so two concurrent starts cannot both see a free slot.

use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::error::EngineError;
use crate::observability::{metrics, MetricsCollector};
use crate::store::ExecutionStore;

pub struct AdmissionController {
    store: Arc<dyn ExecutionStore>,
    max_concurrent: u64,
    gate: Mutex<()>,
    metrics: MetricsCollector,
}

/// Proof of a free slot, release after inserting the record
pub struct AdmissionPermit<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl AdmissionController {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        max_concurrent: u64,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            store,
            max_concurrent,
            gate: Mutex::new(()),
            metrics,
        }
    }

    pub fn max_concurrent(&self) -> u64 {
        self.max_concurrent
    }

    pub async fn request_slot(&self) -> Result<AdmissionPermit<'_>, EngineError> {
        let guard = self.gate.lock().await;
        let active = self.store.count_active().await?;

        if active >= self.max_concurrent {
            warn!(
                active,
                limit = self.max_concurrent,
                "Admission rejected: concurrency limit reached"
            );
            self.metrics
                .increment(metrics::EXECUTION_REJECTED, 1)
                .await;
            return Err(EngineError::AdmissionRejected {
                limit: self.max_concurrent,
            });
        }

        Ok(AdmissionPermit { _guard: guard })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BotType, ExecutionConfig, ExecutionRecord};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    fn pending() -> ExecutionRecord {
        ExecutionRecord::new_pending(
            BotType::Volume,
            json!({}),
            Uuid::new_v4(),
            ExecutionConfig::default(),
            None,
        )
    }

    #[tokio::test]
    async fn test_rejects_at_limit() {
        let store = Arc::new(MemoryStore::new());
        let controller = AdmissionController::new(store.clone(), 1, MetricsCollector::new());

        {
            let _permit = controller.request_slot().await.unwrap();
            store.insert_execution(&pending()).await.unwrap();
        }

        let err = controller.request_slot().await.err().unwrap();
        assert!(matches!(err, EngineError::AdmissionRejected { limit: 1 }));
    }

    #[tokio::test]
    async fn test_permit_serializes_concurrent_starts() {
        let store = Arc::new(MemoryStore::new());
        let controller = Arc::new(AdmissionController::new(
            store.clone(),
            1,
            MetricsCollector::new(),
        ));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let controller = controller.clone();
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let permit = controller.request_slot().await?;
                // Widen the window between count and insert
                tokio::time::sleep(Duration::from_millis(5)).await;
                store.insert_execution(&pending()).await?;
                drop(permit);
                Ok::<_, EngineError>(())
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(store.count_active().await.unwrap(), 1);
    }
}
