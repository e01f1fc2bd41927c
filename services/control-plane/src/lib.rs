pub mod bots;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod health;
pub mod models;
pub mod observability;
pub mod store;
pub mod transactions;

use axum::{
    routing::{get, post},
    Router,
};
use chain_gateway::{
    BlockchainGateway, PaperConfig, PaperGateway, RateLimiter, RemoteSigner, RpcGateway,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use config::{Settings, TradingMode};
pub use error::{CycleError, EngineError};
pub use observability::MetricsCollector;

use bots::BotRegistry;
use engine::{BotExecutor, Dispatcher};
use store::{ExecutionStore, MemoryStore, PgStore, TransactionStore, WalletDirectory};
use transactions::TransactionService;

/// Persistence handles, all three capabilities backed by one store
#[derive(Clone)]
pub struct Stores {
    pub executions: Arc<dyn ExecutionStore>,
    pub transactions: Arc<dyn TransactionStore>,
    pub wallets: Arc<dyn WalletDirectory>,
    /// Present when running against Postgres, used by readiness checks
    pub pg: Option<PgStore>,
}

impl Stores {
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            executions: store.clone(),
            transactions: store.clone(),
            wallets: store,
            pg: None,
        }
    }

    pub fn postgres(store: PgStore) -> Self {
        let shared = Arc::new(store.clone());
        Self {
            executions: shared.clone(),
            transactions: shared.clone(),
            wallets: shared,
            pg: Some(store),
        }
    }
}

/// Process-wide context, built once at startup and shared with every handler
pub struct AppContext {
    pub settings: Settings,
    pub stores: Stores,
    pub registry: Arc<BotRegistry>,
    pub metrics: MetricsCollector,
    pub dispatcher: Dispatcher,
    pub transactions: TransactionService,
}

impl AppContext {
    pub fn new(
        settings: Settings,
        stores: Stores,
        gateway: Arc<dyn BlockchainGateway>,
        registry: BotRegistry,
    ) -> Self {
        let metrics = MetricsCollector::new();
        let registry = Arc::new(registry);

        let executor = Arc::new(BotExecutor::new(gateway.clone(), metrics.clone()));
        let dispatcher = Dispatcher::new(
            stores.executions.clone(),
            stores.wallets.clone(),
            registry.clone(),
            executor,
            settings.engine.max_concurrent_bots,
            metrics.clone(),
        );
        let transactions = TransactionService::new(
            stores.transactions.clone(),
            stores.wallets.clone(),
            gateway,
            settings.transaction_config(),
            metrics.clone(),
        );

        Self {
            settings,
            stores,
            registry,
            metrics,
            dispatcher,
            transactions,
        }
    }

    /// Cancel in-flight executions and wait for their terminal writes
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        info!("Application context shut down");
    }
}

/// Gateway for the configured trading mode, throttled by `limiter`
pub fn build_gateway(
    settings: &Settings,
    limiter: Arc<RateLimiter>,
) -> Result<Arc<dyn BlockchainGateway>, EngineError> {
    match settings.rpc.mode {
        TradingMode::Paper => {
            info!("Using paper gateway");
            Ok(Arc::new(
                PaperGateway::new(PaperConfig::default()).with_rate_limiter(limiter),
            ))
        }
        TradingMode::Live => {
            let signer_url = settings.rpc.signer_url.as_deref().ok_or_else(|| {
                EngineError::Configuration("rpc.signer_url is required in live mode".to_string())
            })?;
            let signer = RemoteSigner::new(
                signer_url,
                Duration::from_secs(settings.rpc.timeout_secs),
            )?;
            let gateway = RpcGateway::new(settings.rpc_gateway_config(), limiter, signer)?;
            Ok(Arc::new(gateway))
        }
    }
}

/// Build the API router
pub fn app(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route(
            "/executions",
            get(handlers::executions::list_executions).post(handlers::executions::start_execution),
        )
        .route("/executions/{id}", get(handlers::executions::get_execution))
        .route(
            "/executions/{id}/cancel",
            post(handlers::executions::cancel_execution),
        )
        .route(
            "/transactions",
            get(handlers::transactions::list_transactions)
                .post(handlers::transactions::create_draft),
        )
        .route(
            "/transactions/{id}",
            get(handlers::transactions::get_transaction),
        )
        .route(
            "/transactions/{id}/submit",
            post(handlers::transactions::submit_transaction),
        )
        .route(
            "/transactions/{id}/cancel",
            post(handlers::transactions::cancel_draft),
        );

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/health/detail", get(health::health_detail))
        .nest("/v1", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
