use bot_control_plane::{
    app, build_gateway, bots::BotRegistry, store, AppContext, Settings, Stores,
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;

    tracing_subscriber::fmt()
        .with_max_level(settings.log_level())
        .init();

    info!("Starting bot control plane...");

    let stores = match settings.database_url.as_deref() {
        Some(database_url) => {
            info!("Connecting to database...");
            let db = store::init_db(database_url).await?;
            info!("Database connected");

            info!("Running migrations...");
            sqlx::migrate!("./migrations").run(&db).await?;
            info!("Migrations applied");

            Stores::postgres(store::PgStore::new(db))
        }
        None => {
            warn!("No database configured, using in-memory store");
            Stores::memory(Arc::new(store::MemoryStore::new()))
        }
    };

    let limiter = Arc::new(settings.rate_limiter());
    let gateway = build_gateway(&settings, limiter)?;

    let port = settings.port;
    let ctx = Arc::new(AppContext::new(
        settings,
        stores,
        gateway,
        BotRegistry::with_defaults(),
    ));

    match ctx.dispatcher.recover_orphans().await {
        Ok(0) => {}
        Ok(n) => warn!("Marked {} interrupted executions as failed", n),
        Err(e) => error!("Orphan recovery failed: {}", e),
    }

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Control plane listening on port {}", port);

    axum::serve(listener, app(ctx.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ctx.shutdown().await;
    info!("Control plane stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
