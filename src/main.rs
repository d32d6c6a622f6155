mod api;
mod automation;
mod billing;
mod db;
mod error;
mod mail;
mod rules;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::AppState;
use mail::LogMailer;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "benefitdesk=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Get data path from environment or use default
    let data_path = std::env::var("BENEFITDESK_DATA_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("benefitdesk"));

    // Initialize database
    let db_path = data_path.join("benefitdesk.db");
    let db = db::init_database(&db_path)
        .await
        .expect("Failed to initialize database");
    tracing::info!("Database initialized at {:?}", db_path);

    // Create application state; campaign and workflow email goes to the
    // log-only mailer until a provider is wired in.
    let state = Arc::new(AppState::new(db, Arc::new(LogMailer)));

    let app = Router::new()
        .merge(api::api_router())
        .route("/health", get(api::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([127, 0, 0, 1], 8080));
    tracing::info!("benefitdesk starting on http://{}", addr);
    tracing::info!("");
    tracing::info!("API endpoints:");
    tracing::info!("  POST /api/orgs                       - Create organization");
    tracing::info!("  GET  /api/orgs/:id/dashboard         - Tenant dashboard");
    tracing::info!("  POST /api/crm/records/:id            - Update record (approval-gated)");
    tracing::info!("  POST /api/crm/records/:id/stage      - Stage transition (blueprint-gated)");
    tracing::info!("  POST /api/billing/failures/:id/retry - Billing retry (1/3/7 day backoff)");
    tracing::info!("  POST /api/campaigns/:id/send         - Send email campaign");
    tracing::info!("  POST /api/crm/webhooks/inbound       - Inbound webhook (X-Webhook-Secret)");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
