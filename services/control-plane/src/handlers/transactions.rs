//! Draft transaction endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::validate_request;
use crate::error::EngineError;
use crate::models::{DraftTransaction, TokenType, TransactionFilter};
use crate::transactions::CreateDraft;
use crate::AppContext;

fn default_token() -> TokenType {
    TokenType::Sol
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDraftRequest {
    pub from_wallet_id: Uuid,
    pub to_wallet_id: Option<Uuid>,
    #[validate(length(min = 32, max = 44))]
    pub to_address: Option<String>,
    /// UI amount, e.g. "1.5" SOL
    pub amount: Decimal,
    #[serde(default = "default_token")]
    pub token: TokenType,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct SubmitRequest {
    /// Lamports, replaces the priority fee quoted at draft time
    #[validate(range(max = 100000000))]
    pub priority_fee: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListTransactionsResponse {
    pub transactions: Vec<DraftTransaction>,
    pub total: usize,
}

/// POST /v1/transactions - validate, quote the fee and store a DRAFT
pub async fn create_draft(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<CreateDraftRequest>,
) -> Result<(StatusCode, Json<DraftTransaction>), EngineError> {
    validate_request(&req)?;

    let draft = ctx
        .transactions
        .create_draft(CreateDraft {
            from_wallet_id: req.from_wallet_id,
            to_wallet_id: req.to_wallet_id,
            to_address: req.to_address,
            amount: req.amount,
            token: req.token,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(draft)))
}

/// GET /v1/transactions - filterable by wallet (either side)
pub async fn list_transactions(
    State(ctx): State<Arc<AppContext>>,
    Query(filter): Query<TransactionFilter>,
) -> Result<Json<ListTransactionsResponse>, EngineError> {
    let transactions = ctx.transactions.list_transactions(&filter).await?;
    let total = transactions.len();
    Ok(Json(ListTransactionsResponse {
        transactions,
        total,
    }))
}

/// GET /v1/transactions/{id}
pub async fn get_transaction(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DraftTransaction>, EngineError> {
    Ok(Json(ctx.transactions.get_transaction(id).await?))
}

/// POST /v1/transactions/{id}/submit - the body is optional
pub async fn submit_transaction(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<Uuid>,
    body: Option<Json<SubmitRequest>>,
) -> Result<Json<DraftTransaction>, EngineError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    validate_request(&req)?;

    Ok(Json(ctx.transactions.submit(id, req.priority_fee).await?))
}

/// POST /v1/transactions/{id}/cancel
pub async fn cancel_draft(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DraftTransaction>, EngineError> {
    Ok(Json(ctx.transactions.cancel_draft(id).await?))
}
