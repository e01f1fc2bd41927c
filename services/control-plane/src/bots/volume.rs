//! Volume bot: buy, wait a few blocks, sell back

use async_trait::async_trait;
use chain_gateway::{is_valid_pubkey, sol_to_lamports, SellAmount, LAMPORTS_PER_SOL};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{sum_metric, Bot, BotError, CycleContext, CycleResult};
use crate::models::BotType;

/// Roughly a minute of slots
pub const MAX_WAIT_BLOCKS: u64 = 150;

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeParams {
    pub mint: String,
    pub buy_amount_sol: Decimal,
    #[serde(default = "default_wait_blocks")]
    pub wait_blocks: u64,
    #[serde(default = "default_sell_percent")]
    pub sell_percent: u8,
}

fn default_wait_blocks() -> u64 {
    2
}

fn default_sell_percent() -> u8 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeCycle {
    pub mint: String,
    pub buy_lamports: u64,
    pub wait_blocks: u64,
    pub sell_percent: u8,
}

pub struct VolumeBot;

#[async_trait]
impl Bot for VolumeBot {
    type Params = VolumeParams;
    type CycleParams = VolumeCycle;

    fn bot_type(&self) -> BotType {
        BotType::Volume
    }

    fn validate(&self, params: &VolumeParams) -> Result<(), String> {
        if !is_valid_pubkey(&params.mint) {
            return Err(format!("mint {} is not a valid public key", params.mint));
        }
        if params.buy_amount_sol <= Decimal::ZERO {
            return Err("buy_amount_sol must be positive".to_string());
        }
        sol_to_lamports(params.buy_amount_sol).map_err(|e| e.to_string())?;
        if params.sell_percent == 0 || params.sell_percent > 100 {
            return Err("sell_percent must be between 1 and 100".to_string());
        }
        if params.wait_blocks > MAX_WAIT_BLOCKS {
            return Err(format!("wait_blocks must be at most {}", MAX_WAIT_BLOCKS));
        }
        Ok(())
    }

    fn prepare_cycle(&self, params: &VolumeParams, _cycle: u32) -> Result<VolumeCycle, String> {
        Ok(VolumeCycle {
            mint: params.mint.clone(),
            buy_lamports: sol_to_lamports(params.buy_amount_sol).map_err(|e| e.to_string())?,
            wait_blocks: params.wait_blocks,
            sell_percent: params.sell_percent,
        })
    }

    async fn execute_cycle(
        &self,
        ctx: &CycleContext,
        params: VolumeCycle,
    ) -> Result<CycleResult, BotError> {
        let bought = ctx
            .gateway
            .buy(&ctx.wallet, &params.mint, params.buy_lamports)
            .await?;
        debug!(
            execution_id = %ctx.execution_id,
            cycle = ctx.cycle,
            "Bought {} tokens for {} lamports",
            bought.token_amount,
            bought.sol_amount
        );

        let after_buy = |result: CycleResult| {
            result
                .with_metric("sol_in", bought.sol_amount)
                .with_metric("tokens_bought", bought.token_amount)
        };

        let rest = async {
            let waited = ctx.gateway.wait_for_blocks(params.wait_blocks).await?;
            let sold = ctx
                .gateway
                .sell(
                    &ctx.wallet,
                    &params.mint,
                    SellAmount::Percent(params.sell_percent),
                )
                .await?;
            Ok::<_, BotError>((waited, sold))
        };

        match rest.await {
            Ok((waited, sold)) => Ok(after_buy(CycleResult::succeeded(vec![
                bought.signature.clone(),
                sold.signature,
            ]))
            .with_metric("sol_out", sold.sol_amount)
            .with_metric("tokens_sold", sold.token_amount)
            .with_metric("blocks_waited", waited)),
            // The buy landed, keep it in the books
            Err(e) => {
                warn!(
                    execution_id = %ctx.execution_id,
                    cycle = ctx.cycle,
                    "Volume cycle failed after buy: {}",
                    e
                );
                Ok(after_buy(CycleResult::failed(
                    format!("sell leg failed: {}", e),
                    vec![bought.signature.clone()],
                )))
            }
        }
    }

    fn aggregate(&self, results: &[CycleResult]) -> Value {
        let lamports = |name| sum_metric(results, name);
        let to_sol = |amount: Decimal| amount / Decimal::from(LAMPORTS_PER_SOL);

        let sol_in = to_sol(lamports("sol_in"));
        let sol_out = to_sol(lamports("sol_out"));

        json!({
            "cycles": results.len(),
            "total_sol_in": sol_in,
            "total_sol_out": sol_out,
            "net_sol": sol_out - sol_in,
            "tokens_bought": lamports("tokens_bought"),
            "tokens_sold": lamports("tokens_sold"),
            "signatures": results.iter().map(|r| r.signatures.len()).sum::<usize>(),
        })
    }
}
