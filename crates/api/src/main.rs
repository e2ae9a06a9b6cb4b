//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::{AppState, JwtAccessGate, SharedGateway};
use chrono::TimeDelta;
use domain::EngineConfig;
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore, RetryingOrderStore};
use payments::{InMemoryPaymentGateway, MpesaGateway, RoutingGateway};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Mobile money goes to Daraja when credentials are configured and to the
/// sandbox gateway otherwise. Card charges only have the sandbox.
fn build_gateway(config: &Config) -> Result<SharedGateway, BoxError> {
    let gateway = match &config.mpesa {
        Some(mpesa) => {
            tracing::info!(base_url = %mpesa.base_url, shortcode = %mpesa.shortcode, "using M-Pesa gateway");
            RoutingGateway::new().with_mobile_money(Arc::new(MpesaGateway::new(mpesa.clone())?))
        }
        None => {
            tracing::warn!("M-Pesa credentials not set, using sandbox payment gateway");
            let sandbox = InMemoryPaymentGateway::new();
            RoutingGateway::new()
                .with_mobile_money(Arc::new(sandbox.clone()))
                .with_card(Arc::new(sandbox))
        }
    };
    Ok(Arc::new(gateway))
}

async fn serve<S: OrderStore + 'static>(
    config: &Config,
    store: S,
    metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
) -> Result<(), BoxError> {
    let verifier = config.require_callback_verifier()?;
    if !verifier.is_enabled() {
        tracing::warn!("CALLBACK_TOKEN and CALLBACK_HMAC_SECRET not set, sandbox payment callbacks are unauthenticated");
    }

    let access_gate = JwtAccessGate::new(config.require_jwt_secret()?, config.jwt_issuer.as_deref());
    let engine_config = EngineConfig {
        dispatch_claim_ttl: TimeDelta::seconds(config.charge_claim_ttl_secs),
        ..EngineConfig::default()
    };

    let state = Arc::new(AppState::new(
        store,
        build_gateway(config)?,
        Arc::new(access_gate),
        verifier,
        engine_config,
    ));
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Pick the order store and serve
    match &config.database_url {
        Some(url) => {
            let store = PostgresOrderStore::connect(url, DATABASE_MAX_CONNECTIONS).await?;
            store.run_migrations().await?;
            tracing::info!("connected to PostgreSQL order store");
            serve(&config, RetryingOrderStore::new(store), metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory");
            serve(&config, InMemoryOrderStore::new(), metrics_handle).await
        }
    }
}
