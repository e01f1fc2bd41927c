//! Remote signing service client
//!
//! Keys never live in this process. Instruction construction and signing are
//! requested from an external signer that returns the wire-encoded transaction.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::GatewayError;
use crate::rpc::{BuiltTransaction, TransactionBuilder};
use crate::types::{CurveState, FeeEstimate, TransferRequest};

pub struct RemoteSigner {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct TradeBuildRequest<'a> {
    wallet: &'a str,
    mint: &'a str,
    sol_amount: Option<u64>,
    token_amount: Option<u64>,
}

#[derive(Debug, Serialize)]
struct TransferBuildRequest<'a> {
    #[serde(flatten)]
    request: &'a TransferRequest,
    fee: FeeEstimate,
}

#[derive(Debug, Deserialize)]
struct BuildResponse {
    transaction: String,
    #[serde(default)]
    sol_amount: u64,
    #[serde(default)]
    token_amount: u64,
    curve: Option<CurveState>,
}

impl RemoteSigner {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::InvalidInput(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn build<T: Serialize + ?Sized>(
        &self,
        kind: &str,
        body: &T,
    ) -> Result<BuiltTransaction, GatewayError> {
        let url = format!("{}/build/{}", self.base_url, kind);
        let method = format!("signer.{}", kind);

        debug!("Requesting {} transaction from signer", kind);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::transport(&method, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rpc {
                method,
                code: status.as_u16() as i64,
                message: text,
            });
        }

        let built: BuildResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::transport(&method, e.to_string()))?;

        Ok(BuiltTransaction {
            payload: built.transaction,
            sol_amount: built.sol_amount,
            token_amount: built.token_amount,
            curve: built.curve,
        })
    }
}

#[async_trait]
impl TransactionBuilder for RemoteSigner {
    async fn build_buy(
        &self,
        wallet: &str,
        mint: &str,
        sol_amount: u64,
    ) -> Result<BuiltTransaction, GatewayError> {
        let request = TradeBuildRequest {
            wallet,
            mint,
            sol_amount: Some(sol_amount),
            token_amount: None,
        };
        self.build("buy", &request).await
    }

    async fn build_sell(
        &self,
        wallet: &str,
        mint: &str,
        token_amount: u64,
    ) -> Result<BuiltTransaction, GatewayError> {
        let request = TradeBuildRequest {
            wallet,
            mint,
            sol_amount: None,
            token_amount: Some(token_amount),
        };
        self.build("sell", &request).await
    }

    async fn build_transfer(
        &self,
        request: &TransferRequest,
        fee: FeeEstimate,
    ) -> Result<BuiltTransaction, GatewayError> {
        self.build("transfer", &TransferBuildRequest { request, fee })
            .await
    }
}
