//! Accumulator bot: buy a fixed or growing amount every cycle

use async_trait::async_trait;
use chain_gateway::{is_valid_pubkey, sol_to_lamports, LAMPORTS_PER_SOL};
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{sum_metric, Bot, BotError, CycleContext, CycleResult};
use crate::models::BotType;

#[derive(Debug, Clone, Deserialize)]
pub struct AccumulatorParams {
    pub mint: String,
    pub amount_per_cycle_sol: Decimal,
    /// Growth of the buy size per cycle, in percent
    #[serde(default)]
    pub step_percent: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccumulatorCycle {
    pub mint: String,
    pub lamports: u64,
}

pub struct AccumulatorBot;

impl AccumulatorBot {
    /// amount * (1 + step/100)^cycle
    fn cycle_amount(params: &AccumulatorParams, cycle: u32) -> Option<Decimal> {
        let growth = Decimal::ONE + params.step_percent / Decimal::ONE_HUNDRED;
        growth
            .checked_powi(i64::from(cycle))
            .and_then(|factor| params.amount_per_cycle_sol.checked_mul(factor))
    }
}

#[async_trait]
impl Bot for AccumulatorBot {
    type Params = AccumulatorParams;
    type CycleParams = AccumulatorCycle;

    fn bot_type(&self) -> BotType {
        BotType::Accumulator
    }

    fn validate(&self, params: &AccumulatorParams) -> Result<(), String> {
        if !is_valid_pubkey(&params.mint) {
            return Err(format!("mint {} is not a valid public key", params.mint));
        }
        if params.amount_per_cycle_sol <= Decimal::ZERO {
            return Err("amount_per_cycle_sol must be positive".to_string());
        }
        if params.step_percent < Decimal::ZERO || params.step_percent > Decimal::ONE_HUNDRED {
            return Err("step_percent must be between 0 and 100".to_string());
        }
        sol_to_lamports(params.amount_per_cycle_sol).map_err(|e| e.to_string())?;
        Ok(())
    }

    fn prepare_cycle(
        &self,
        params: &AccumulatorParams,
        cycle: u32,
    ) -> Result<AccumulatorCycle, String> {
        let amount = Self::cycle_amount(params, cycle)
            .ok_or_else(|| format!("buy size overflows at cycle {}", cycle))?;

        Ok(AccumulatorCycle {
            mint: params.mint.clone(),
            lamports: sol_to_lamports(amount).map_err(|e| e.to_string())?,
        })
    }

    async fn execute_cycle(
        &self,
        ctx: &CycleContext,
        params: AccumulatorCycle,
    ) -> Result<CycleResult, BotError> {
        let bought = ctx
            .gateway
            .buy(&ctx.wallet, &params.mint, params.lamports)
            .await?;

        let mut result = CycleResult::succeeded(vec![bought.signature])
            .with_metric("sol_spent", bought.sol_amount)
            .with_metric("tokens_acquired", bought.token_amount);
        if let Some(curve) = bought.curve {
            result = result.with_metric("spot_price", curve.spot_price());
        }
        Ok(result)
    }

    fn aggregate(&self, results: &[CycleResult]) -> Value {
        let spent = sum_metric(results, "sol_spent");
        let tokens = sum_metric(results, "tokens_acquired");
        let average_price = if tokens.is_zero() {
            None
        } else {
            Some(spent / tokens)
        };

        json!({
            "purchases": results.iter().filter(|r| r.success).count(),
            "total_sol_spent": spent / Decimal::from(LAMPORTS_PER_SOL),
            "tokens_acquired": tokens,
            "average_price_lamports": average_price,
        })
    }
}
