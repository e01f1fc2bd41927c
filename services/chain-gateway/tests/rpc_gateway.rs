//! RPC gateway against a mocked JSON-RPC node

use async_trait::async_trait;
use chain_gateway::{
    BlockchainGateway, BuiltTransaction, FeeEstimate, GatewayError, RateLimiter, RpcGateway,
    RpcGatewayConfig, SellAmount, TransactionBuilder, TransferAsset, TransferRequest,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OWNER: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";
const MINT: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

/// Builder that records what it was asked to build
#[derive(Default)]
struct RecordingBuilder {
    sells: Mutex<Vec<u64>>,
    transfers: Mutex<Vec<FeeEstimate>>,
}

#[async_trait]
impl TransactionBuilder for RecordingBuilder {
    async fn build_buy(
        &self,
        _wallet: &str,
        _mint: &str,
        sol_amount: u64,
    ) -> Result<BuiltTransaction, GatewayError> {
        Ok(BuiltTransaction {
            payload: "AQID".to_string(),
            sol_amount,
            token_amount: 42,
            curve: None,
        })
    }

    async fn build_sell(
        &self,
        _wallet: &str,
        _mint: &str,
        token_amount: u64,
    ) -> Result<BuiltTransaction, GatewayError> {
        self.sells.lock().unwrap().push(token_amount);
        Ok(BuiltTransaction {
            payload: "BAUG".to_string(),
            sol_amount: 7,
            token_amount,
            curve: None,
        })
    }

    async fn build_transfer(
        &self,
        _request: &TransferRequest,
        fee: FeeEstimate,
    ) -> Result<BuiltTransaction, GatewayError> {
        self.transfers.lock().unwrap().push(fee);
        Ok(BuiltTransaction {
            payload: "BwgJ".to_string(),
            sol_amount: 0,
            token_amount: 0,
            curve: None,
        })
    }
}

fn gateway(server: &MockServer) -> RpcGateway<RecordingBuilder> {
    let config = RpcGatewayConfig {
        url: server.uri(),
        timeout: Duration::from_secs(5),
        confirm_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(10),
        compute_unit_limit: 200_000,
    };
    RpcGateway::new(config, Arc::new(RateLimiter::disabled()), RecordingBuilder::default()).unwrap()
}

fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
}

fn transfer() -> TransferRequest {
    TransferRequest {
        from: OWNER.to_string(),
        to: MINT.to_string(),
        asset: TransferAsset::Sol,
        amount: 1_000,
        priority_fee: None,
    }
}

#[tokio::test]
async fn test_get_balance() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getBalance" })))
        .respond_with(rpc_result(json!({ "context": { "slot": 1 }, "value": 2_500_000_000u64 })))
        .expect(1)
        .mount(&server)
        .await;

    let balance = gateway(&server).get_balance(OWNER).await.unwrap();
    assert_eq!(balance, 2_500_000_000);
}

#[tokio::test]
async fn test_token_balance_sums_accounts() {
    let server = MockServer::start().await;
    let account = |amount: &str| {
        json!({
            "pubkey": "acc",
            "account": { "data": { "parsed": { "info": { "tokenAmount": { "amount": amount } } } } }
        })
    };
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getTokenAccountsByOwner" })))
        .respond_with(rpc_result(json!({
            "context": { "slot": 1 },
            "value": [account("1500"), account("500")]
        })))
        .mount(&server)
        .await;

    let balance = gateway(&server).get_token_balance(OWNER, MINT).await.unwrap();
    assert_eq!(balance, 2_000);
}

#[tokio::test]
async fn test_fee_estimate_uses_recent_priority_fees() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getRecentPrioritizationFees" })))
        .respond_with(rpc_result(json!([
            { "slot": 1, "prioritizationFee": 0 },
            { "slot": 2, "prioritizationFee": 1000 },
            { "slot": 3, "prioritizationFee": 5000 },
            { "slot": 4, "prioritizationFee": 9000 }
        ])))
        .mount(&server)
        .await;

    let fee = gateway(&server).estimate_fee(&transfer()).await.unwrap();
    assert_eq!(fee.base_fee, 5_000);
    // 75th percentile 9000 micro-lamports/CU * 200k CU
    assert_eq!(fee.priority_fee, 1_800);
}

#[tokio::test]
async fn test_explicit_priority_fee_skips_rpc() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let mut request = transfer();
    request.priority_fee = Some(77);
    let fee = gateway(&server).estimate_fee(&request).await.unwrap();
    assert_eq!(fee.priority_fee, 77);
}

#[tokio::test]
async fn test_send_and_confirm_polls_until_confirmed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getRecentPrioritizationFees" })))
        .respond_with(rpc_result(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "sendTransaction" })))
        .respond_with(rpc_result(json!("5sig")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getSignatureStatuses" })))
        .respond_with(rpc_result(json!({ "context": { "slot": 1 }, "value": [null] })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getSignatureStatuses" })))
        .respond_with(rpc_result(json!({
            "context": { "slot": 2 },
            "value": [{ "slot": 2, "confirmations": 1, "err": null, "confirmationStatus": "confirmed" }]
        })))
        .mount(&server)
        .await;

    let gw = gateway(&server);
    let signature = gw.send_and_confirm(&transfer()).await.unwrap();
    assert_eq!(signature, "5sig");
}

#[tokio::test]
async fn test_failed_transaction_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "sendTransaction" })))
        .respond_with(rpc_result(json!("5sig")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getSignatureStatuses" })))
        .respond_with(rpc_result(json!({
            "context": { "slot": 2 },
            "value": [{ "slot": 2, "err": { "InstructionError": [0, "Custom"] }, "confirmationStatus": "processed" }]
        })))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .buy(OWNER, MINT, 1_000_000)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::TransactionFailed { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_unconfirmed_transaction_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "sendTransaction" })))
        .respond_with(rpc_result(json!("5sig")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getSignatureStatuses" })))
        .respond_with(rpc_result(json!({ "context": { "slot": 1 }, "value": [null] })))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .buy(OWNER, MINT, 1_000_000)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotConfirmed { .. }));
}

#[tokio::test]
async fn test_rpc_error_body_is_mapped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32602, "message": "Invalid param: WrongSize" }
        })))
        .mount(&server)
        .await;

    let err = gateway(&server).get_balance("bogus").await.unwrap_err();
    match err {
        GatewayError::Rpc { code, ref message, .. } => {
            assert_eq!(code, -32602);
            assert!(message.contains("WrongSize"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_http_429_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Too many requests"))
        .mount(&server)
        .await;

    let err = gateway(&server).get_balance(OWNER).await.unwrap_err();
    assert!(matches!(err, GatewayError::Rpc { code: 429, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_sell_percent_resolves_against_balance() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getTokenAccountsByOwner" })))
        .respond_with(rpc_result(json!({
            "context": { "slot": 1 },
            "value": [{ "account": { "data": { "parsed": { "info": { "tokenAmount": { "amount": "1000" } } } } } }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "sendTransaction" })))
        .respond_with(rpc_result(json!("sellsig")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getSignatureStatuses" })))
        .respond_with(rpc_result(json!({
            "context": { "slot": 2 },
            "value": [{ "err": null, "confirmationStatus": "finalized" }]
        })))
        .mount(&server)
        .await;

    let gw = gateway(&server);
    let receipt = gw.sell(OWNER, MINT, SellAmount::Percent(25)).await.unwrap();
    assert_eq!(receipt.signature, "sellsig");
    assert_eq!(receipt.token_amount, 250);
}

#[tokio::test]
async fn test_wait_for_blocks_polls_slot() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getSlot" })))
        .respond_with(rpc_result(json!(100)))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getSlot" })))
        .respond_with(rpc_result(json!(103)))
        .mount(&server)
        .await;

    let waited = gateway(&server).wait_for_blocks(3).await.unwrap();
    assert_eq!(waited, 3);
}
