//! Execution endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::validate_request;
use crate::engine::StartExecution;
use crate::error::EngineError;
use crate::models::{BotType, ExecutionConfig, ExecutionFilter, ExecutionRecord, ExecutionStatus};
use crate::AppContext;

fn default_repeat_count() -> u32 {
    1
}

#[derive(Debug, Deserialize, Validate)]
pub struct StartExecutionRequest {
    pub bot_type: BotType,
    #[serde(default)]
    pub params: Value,
    pub wallet_id: Uuid,
    #[serde(default = "default_repeat_count")]
    #[validate(range(min = 1, max = 1000))]
    pub repeat_count: u32,
    #[serde(default)]
    #[validate(range(max = 86400))]
    pub interval_seconds: u64,
    /// Caller's correlation id, stored on the record
    #[validate(length(min = 1, max = 128))]
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartExecutionResponse {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListExecutionsResponse {
    pub executions: Vec<ExecutionRecord>,
    pub total: usize,
}

/// POST /v1/executions - admit and launch a bot run
pub async fn start_execution(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<StartExecutionRequest>,
) -> Result<(StatusCode, Json<StartExecutionResponse>), EngineError> {
    validate_request(&req)?;

    let execution_id = ctx
        .dispatcher
        .start_execution(StartExecution {
            bot_type: req.bot_type,
            params: req.params,
            wallet_id: req.wallet_id,
            config: ExecutionConfig {
                repeat_count: req.repeat_count,
                interval_seconds: req.interval_seconds,
            },
            request_id: req.request_id,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartExecutionResponse {
            execution_id,
            status: ExecutionStatus::Pending,
        }),
    ))
}

/// GET /v1/executions - most recent first, filterable by id or wallet
pub async fn list_executions(
    State(ctx): State<Arc<AppContext>>,
    Query(filter): Query<ExecutionFilter>,
) -> Result<Json<ListExecutionsResponse>, EngineError> {
    let executions = ctx.dispatcher.list_executions(&filter).await?;
    let total = executions.len();
    Ok(Json(ListExecutionsResponse { executions, total }))
}

/// GET /v1/executions/{id}
pub async fn get_execution(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExecutionRecord>, EngineError> {
    Ok(Json(ctx.dispatcher.get_status(id).await?))
}

/// POST /v1/executions/{id}/cancel
pub async fn cancel_execution(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ExecutionRecord>), EngineError> {
    let record = ctx.dispatcher.cancel_execution(id).await?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}
