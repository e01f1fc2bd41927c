//! Bot capability contract
//!
//! A [`Bot`] is a strategy with typed parameters. The engine never sees those
//! types: [`Typed`] adapts any bot into an object-safe [`BotDescriptor`] that
//! works over JSON params, so the registry can hold one trait object per
//! [`BotType`] and parameter mismatches surface as validation errors.

use async_trait::async_trait;
use chain_gateway::{BlockchainGateway, GatewayError};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::BotType;

pub mod accumulator;
pub mod registry;
pub mod volume;

pub use accumulator::AccumulatorBot;
pub use registry::BotRegistry;
pub use volume::VolumeBot;

/// What a cycle gets to work with
#[derive(Clone)]
pub struct CycleContext {
    pub execution_id: Uuid,
    pub cycle: u32,
    /// Public key of the executing wallet
    pub wallet: String,
    pub gateway: Arc<dyn BlockchainGateway>,
}

/// Outcome of one cycle, folded into the aggregate at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleResult {
    pub success: bool,
    pub error: Option<String>,
    pub signatures: Vec<String>,
    pub metrics: BTreeMap<String, Decimal>,
}

impl CycleResult {
    pub fn succeeded(signatures: Vec<String>) -> Self {
        Self {
            success: true,
            signatures,
            ..Default::default()
        }
    }

    /// Partial cycle: something went through on chain before the failure
    pub fn failed(error: impl Into<String>, signatures: Vec<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            signatures,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: &str, value: impl Into<Decimal>) -> Self {
        self.metrics.insert(name.to_string(), value.into());
        self
    }

    pub fn metric(&self, name: &str) -> Decimal {
        self.metrics.get(name).copied().unwrap_or(Decimal::ZERO)
    }
}

/// Sum a metric across cycles
pub fn sum_metric(results: &[CycleResult], name: &str) -> Decimal {
    results.iter().map(|r| r.metric(name)).sum()
}

#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("{0}")]
    Strategy(String),
}

#[async_trait]
pub trait Bot: Send + Sync + 'static {
    type Params: DeserializeOwned + Send + Sync;
    type CycleParams: Serialize + DeserializeOwned + Send;

    fn bot_type(&self) -> BotType;

    fn validate(&self, params: &Self::Params) -> Result<(), String>;

    /// Derive the parameters of cycle `cycle`, a pure function of its inputs
    fn prepare_cycle(&self, params: &Self::Params, cycle: u32)
        -> Result<Self::CycleParams, String>;

    async fn execute_cycle(
        &self,
        ctx: &CycleContext,
        params: Self::CycleParams,
    ) -> Result<CycleResult, BotError>;

    fn aggregate(&self, results: &[CycleResult]) -> Value;
}

/// Object-safe view of a bot over JSON params
#[async_trait]
pub trait BotDescriptor: Send + Sync {
    fn validate(&self, params: &Value) -> Result<(), EngineError>;

    fn prepare_cycle(&self, params: &Value, cycle: u32) -> Result<Value, String>;

    async fn execute_cycle(
        &self,
        ctx: &CycleContext,
        cycle_params: Value,
    ) -> Result<CycleResult, BotError>;

    fn aggregate(&self, results: &[CycleResult]) -> Value;
}

pub struct Typed<B>(pub B);

fn parse_params<P: DeserializeOwned>(params: &Value) -> Result<P, String> {
    serde_json::from_value(params.clone()).map_err(|e| format!("invalid params: {}", e))
}

#[async_trait]
impl<B: Bot> BotDescriptor for Typed<B> {
    fn validate(&self, params: &Value) -> Result<(), EngineError> {
        let params: B::Params = parse_params(params).map_err(EngineError::Validation)?;
        self.0.validate(&params).map_err(EngineError::Validation)
    }

    fn prepare_cycle(&self, params: &Value, cycle: u32) -> Result<Value, String> {
        let params: B::Params = parse_params(params)?;
        let prepared = self.0.prepare_cycle(&params, cycle)?;
        serde_json::to_value(prepared).map_err(|e| format!("cycle params: {}", e))
    }

    async fn execute_cycle(
        &self,
        ctx: &CycleContext,
        cycle_params: Value,
    ) -> Result<CycleResult, BotError> {
        let params: B::CycleParams = parse_params(&cycle_params).map_err(BotError::Strategy)?;
        self.0.execute_cycle(ctx, params).await
    }

    fn aggregate(&self, results: &[CycleResult]) -> Value {
        self.0.aggregate(results)
    }
}
