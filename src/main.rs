use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_server::api::{self, AppState};
use storefront_server::config::Config;
use storefront_server::gateway::mercadopago::MercadoPagoGateway;
use storefront_server::notify::email::EmailNotifier;
use storefront_server::service::{OrderService, ReconcileService};
use storefront_server::store::postgres::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("could not connect to the database")?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let store = Arc::new(PgStore::new(db));
    let gateway = Arc::new(MercadoPagoGateway::new(&config.gateway));
    let notifier = Arc::new(EmailNotifier::new(&config.smtp, &config.store_name));
    if !config.gateway.is_configured() {
        tracing::warn!("payment gateway token missing, checkout is disabled");
    }

    let orders = Arc::new(OrderService::new(
        store.clone(),
        store.clone(),
        config.shipping.clone(),
    ));
    let reconcile = Arc::new(ReconcileService::new(
        store.clone(),
        gateway.clone(),
        notifier,
    ));
    let app = api::router(AppState {
        orders,
        reconcile,
        store,
        gateway,
        gateway_config: config.gateway.clone(),
        store_name: config.store_name.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(%addr, store = %config.store_name, "storefront server listening");
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app).await?;
    Ok(())
}
