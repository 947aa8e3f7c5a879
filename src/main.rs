use beauty_shop_backend::api::{self, AppState};
use beauty_shop_backend::config::AppConfig;
use beauty_shop_backend::database::catalog_repository::CatalogRepository;
use beauty_shop_backend::database::init_pool_from_config;
use beauty_shop_backend::database::order_repository::OrderRepository;
use beauty_shop_backend::database::user_repository::UserRepository;
use beauty_shop_backend::health::{DatabaseProbe, HealthChecker};
use beauty_shop_backend::invoice::InvoiceRenderer;
use beauty_shop_backend::logging::init_tracing;
use beauty_shop_backend::payments::MpesaClient;
use beauty_shop_backend::services::{
    CartService, NotificationDispatcher, OrderAssemblyService, PaymentCallbackReconciler,
};
use beauty_shop_backend::workers::invoice_delivery::{InvoiceDeliveryWorker, InvoiceQueue};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "🚀 Starting beauty shop backend"
    );

    let missing = config.mpesa.missing_credentials();
    if !missing.is_empty() {
        warn!(
            missing = ?missing,
            "⚠️  M-Pesa credentials incomplete, payment requests will fail with a configuration error"
        );
    }

    info!("📊 Initializing database connection pool...");
    let db_pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        e
    })?;
    info!(
        max_connections = db_pool.options().get_max_connections(),
        "✅ Database connection pool initialized"
    );

    if config.database.run_migrations {
        info!("🗄️  Applying database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        info!("✅ Migrations applied");
    }

    let order_store = Arc::new(OrderRepository::new(db_pool.clone()));
    let gateway = Arc::new(MpesaClient::new(config.mpesa.clone())?);
    let renderer = InvoiceRenderer::new(&config.invoice);
    let dispatcher =
        NotificationDispatcher::from_config(config.mail.as_ref(), config.invoice.company_name.clone());

    let (invoice_queue, invoice_rx) = InvoiceQueue::new();
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let invoice_worker = InvoiceDeliveryWorker::new(
        invoice_rx,
        renderer.clone(),
        dispatcher,
        config.invoice.output_dir.clone(),
    );
    let worker_handle = tokio::spawn(invoice_worker.run(worker_shutdown_rx));

    let state = AppState {
        orders: Arc::new(OrderAssemblyService::new(
            order_store.clone(),
            gateway,
            renderer,
            invoice_queue,
        )),
        callbacks: Arc::new(PaymentCallbackReconciler::new(order_store)),
        carts: Arc::new(CartService::new(Arc::new(CatalogRepository::new(db_pool.clone())))),
        users: Arc::new(UserRepository::new(db_pool.clone())),
        health: HealthChecker::new(Arc::new(DatabaseProbe::new(db_pool))),
    };

    let app = api::router(state);
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(10), worker_handle)
        .await
        .is_err()
    {
        error!("Timed out waiting for invoice worker shutdown");
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
