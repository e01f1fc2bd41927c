//! Shared harness for engine and transaction integration tests
//!
//! Everything runs against `MemoryStore` and a `PaperGateway`; bots with
//! scripted behavior stand in for real strategies where outcomes must be exact.

#![allow(dead_code)]

use async_trait::async_trait;
use bot_control_plane::{
    bots::{Bot, BotError, BotRegistry, CycleContext, CycleResult},
    engine::{BotExecutor, Dispatcher, StartExecution},
    models::{BotType, ExecutionConfig, ExecutionRecord, ExecutionStatus, Wallet},
    store::MemoryStore,
    MetricsCollector,
};
use chain_gateway::{GatewayError, PaperConfig, PaperGateway};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const WALLET_KEY: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";
pub const OTHER_KEY: &str = "So11111111111111111111111111111111111111112";
pub const EXTERNAL_KEY: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const MINT: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

pub const ONE_SOL: u64 = 1_000_000_000;

/// Bot whose outcome per cycle is fixed up front
pub struct ScriptedBot {
    pub fail_on: Vec<u32>,
    pub panic_in_aggregate: bool,
    /// Simulated work per cycle, keeps executions active
    pub cycle_time: Duration,
    pub calls: Arc<AtomicU32>,
}

impl ScriptedBot {
    pub fn new() -> Self {
        Self {
            fail_on: Vec::new(),
            panic_in_aggregate: false,
            cycle_time: Duration::ZERO,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn failing_on(mut self, cycles: &[u32]) -> Self {
        self.fail_on = cycles.to_vec();
        self
    }

    pub fn slow(mut self, cycle_time: Duration) -> Self {
        self.cycle_time = cycle_time;
        self
    }

    pub fn panicking_in_aggregate(mut self) -> Self {
        self.panic_in_aggregate = true;
        self
    }
}

#[derive(Deserialize)]
pub struct ScriptedParams {
    #[serde(default)]
    pub reject: bool,
}

#[derive(Serialize, Deserialize)]
pub struct ScriptedCycle {
    pub index: u32,
}

#[async_trait]
impl Bot for ScriptedBot {
    type Params = ScriptedParams;
    type CycleParams = ScriptedCycle;

    fn bot_type(&self) -> BotType {
        BotType::Volume
    }

    fn validate(&self, params: &ScriptedParams) -> Result<(), String> {
        if params.reject {
            return Err("params rejected".to_string());
        }
        Ok(())
    }

    fn prepare_cycle(&self, _params: &ScriptedParams, cycle: u32) -> Result<ScriptedCycle, String> {
        Ok(ScriptedCycle { index: cycle })
    }

    async fn execute_cycle(
        &self,
        _ctx: &CycleContext,
        params: ScriptedCycle,
    ) -> Result<CycleResult, BotError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.cycle_time.is_zero() {
            tokio::time::sleep(self.cycle_time).await;
        }
        if self.fail_on.contains(&params.index) {
            return Err(GatewayError::transport("buy", format!("cycle {} failed", params.index)).into());
        }
        Ok(CycleResult::succeeded(vec![format!("sig-{}", params.index)]))
    }

    fn aggregate(&self, results: &[CycleResult]) -> Value {
        if self.panic_in_aggregate {
            panic!("aggregate blew up");
        }
        json!({ "succeeded": results.iter().filter(|r| r.success).count() })
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<PaperGateway>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: MetricsCollector,
    pub wallet: Wallet,
}

pub fn paper_gateway() -> Arc<PaperGateway> {
    Arc::new(PaperGateway::new(PaperConfig {
        slot_time: Duration::ZERO,
        ..PaperConfig::default()
    }))
}

pub async fn harness(registry: BotRegistry, max_concurrent: u64) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let gateway = paper_gateway();
    let metrics = MetricsCollector::new();

    let wallet = Wallet::new("primary", WALLET_KEY);
    store.insert_wallet(wallet.clone()).await;
    gateway.fund(WALLET_KEY, 10 * ONE_SOL);

    let executor = Arc::new(BotExecutor::new(gateway.clone(), metrics.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        store.clone(),
        Arc::new(registry),
        executor,
        max_concurrent,
        metrics.clone(),
    ));

    Harness {
        store,
        gateway,
        dispatcher,
        metrics,
        wallet,
    }
}

pub fn scripted_registry(bot: ScriptedBot) -> BotRegistry {
    let mut registry = BotRegistry::new();
    registry.register_bot(bot);
    registry
}

impl Harness {
    pub fn start_request(&self, params: Value, repeat_count: u32, interval_seconds: u64) -> StartExecution {
        StartExecution {
            bot_type: BotType::Volume,
            params,
            wallet_id: self.wallet.id,
            config: ExecutionConfig {
                repeat_count,
                interval_seconds,
            },
            request_id: None,
        }
    }

    /// Poll until the background run has marked the record RUNNING
    pub async fn wait_for_running(&self, id: Uuid) {
        for _ in 0..10_000 {
            let record = self.dispatcher.get_status(id).await.unwrap();
            if record.status == ExecutionStatus::Running {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution {} never started running", id);
    }

    /// Poll until the record leaves PENDING/RUNNING
    pub async fn wait_for_terminal(&self, id: Uuid) -> ExecutionRecord {
        for _ in 0..10_000 {
            let record = self.dispatcher.get_status(id).await.unwrap();
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("execution {} never reached a terminal state", id);
    }
}
