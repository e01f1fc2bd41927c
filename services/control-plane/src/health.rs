//! Health check endpoints for load balancers and monitoring

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::observability::MetricsSnapshot;
use crate::AppContext;

/// Basic health check - fast, no external dependencies
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Detailed health: store connectivity, engine load and the metrics snapshot.
/// Responds 503 with the same body when a check fails.
pub async fn health_detail(
    State(ctx): State<Arc<AppContext>>,
) -> (StatusCode, Json<DetailedHealthResponse>) {
    let mut checks = Vec::new();
    let mut all_ok = true;

    let store_status = match &ctx.stores.pg {
        Some(pg) => match pg.ping().await {
            Ok(()) => "ok".to_string(),
            Err(e) => {
                tracing::error!("Database health check failed: {}", e);
                all_ok = false;
                "error".to_string()
            }
        },
        None => "memory".to_string(),
    };
    checks.push(HealthCheck {
        name: "store".to_string(),
        status: store_status,
    });

    checks.push(HealthCheck {
        name: "gateway".to_string(),
        status: match ctx.settings.rpc.mode {
            crate::TradingMode::Paper => "paper".to_string(),
            crate::TradingMode::Live => "live".to_string(),
        },
    });

    let response = DetailedHealthResponse {
        status: if all_ok { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks,
        engine: EngineHealth {
            running_executions: ctx.dispatcher.running_count(),
            max_concurrent: ctx.dispatcher.max_concurrent(),
            bot_types: ctx
                .registry
                .bot_types()
                .into_iter()
                .map(|t| t.to_string())
                .collect(),
        },
        metrics: ctx.metrics.snapshot().await,
    };

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

#[derive(Serialize)]
pub struct DetailedHealthResponse {
    pub status: String,
    pub version: String,
    pub checks: Vec<HealthCheck>,
    pub engine: EngineHealth,
    pub metrics: MetricsSnapshot,
}

#[derive(Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct EngineHealth {
    pub running_executions: usize,
    pub max_concurrent: u64,
    pub bot_types: Vec<String>,
}
