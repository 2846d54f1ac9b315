// src/main.rs
use axum::{extract::Extension, middleware, routing::get, Json, Router};
use dotenv::dotenv;
use reqwest::Client;
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::PathBuf;
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use tokio::{net::TcpListener, sync::RwLock};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// MODULE IMPORTS
// ============================================================================

mod auth;
mod billing;
mod common;
mod logging_middleware;
mod services;

// ============================================================================
// COMMON IMPORTS
// ============================================================================

use auth::session::SessionIssuer;
use billing::catalog::ProductCatalog;
use billing::gateway::CreemGateway;
use common::{AppConfig, AppState};
use services::{EmailSender, LogEmailSender, SesEmailSender};

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // ========================================================================
    // ENVIRONMENT CONFIGURATION
    // ========================================================================

    let config = AppConfig::from_env();
    info!(
        app_base_url = %config.app_base_url,
        port = config.port,
        "Configuration loaded"
    );

    // ========================================================================
    // DATABASE SETUP
    // ========================================================================

    if let Some(path_part) = config.database_url.strip_prefix("sqlite://") {
        let path_without_params = path_part.split('?').next().unwrap_or("");
        if !path_without_params.is_empty() && !path_without_params.starts_with(':') {
            let db_path = PathBuf::from(path_without_params);
            if let Some(parent) = db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }
    }

    let connect_options =
        SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(connect_options)
        .await?;

    // Run database migrations
    common::migrations::run_migrations(&pool, config.reset_db).await?;

    // ========================================================================
    // SERVICE INITIALIZATION
    // ========================================================================

    let http_client = Client::builder()
        .no_proxy()
        .timeout(config.http_timeout)
        .build()?;

    let email_sender: Arc<dyn EmailSender> = match config.ses_from_email.as_deref() {
        Some(from_email) => {
            let sender = SesEmailSender::connect(from_email, &config.ses_region).await?;
            if let Err(e) = sender.verify().await {
                warn!(error = %e, "SES verification failed; reset emails may not be delivered");
            }
            Arc::new(sender)
        }
        None => {
            warn!("AWS_SES_FROM_EMAIL not set; reset emails will be logged instead of sent");
            Arc::new(LogEmailSender)
        }
    };
    info!("EmailSender initialized");

    let catalog = Arc::new(ProductCatalog::from_product_ids(&config.product_ids));
    if catalog.is_empty() {
        warn!("No CREEM_PRODUCT_ID_* configured; checkouts will be rejected");
    }

    if config.creem_api_key.is_none() {
        warn!("CREEM_API_KEY not set; checkouts and payment callbacks will fail");
    }
    let payment_gateway = Arc::new(CreemGateway::new(
        http_client.clone(),
        &config.creem_api_base_url,
        config.creem_api_key.clone(),
    ));
    info!("PaymentGateway initialized");

    if config.jwt_secret.is_none() {
        warn!("JWT_SECRET not set; every sign-in will fail until it is configured");
    }
    let sessions = Arc::new(SessionIssuer::new(config.jwt_secret.clone()));

    if config.google_client_id.is_none() {
        warn!("GOOGLE_CLIENT_ID not set; Google sign-in is disabled");
    }

    // ========================================================================
    // APPLICATION STATE
    // ========================================================================

    let port = config.port;
    let cors_origins = config.cors_origins.clone();

    let app_state = AppState {
        db: pool,
        config: Arc::new(config),
        http: http_client,
        sessions,
        email_sender,
        payment_gateway,
        catalog,
    };

    let shared = Arc::new(RwLock::new(app_state));

    // ========================================================================
    // ROUTER COMPOSITION
    // ========================================================================

    let app = Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        // ====================================================================
        // AUTHENTICATION ROUTES
        // ====================================================================
        .merge(auth::auth_routes())
        // ====================================================================
        // BILLING ROUTES (Checkout, Callback, Subscription)
        // ====================================================================
        .merge(billing::billing_routes())
        // ====================================================================
        // MIDDLEWARE AND LAYERS
        // ====================================================================
        // Add request/response body logging in debug mode
        .layer(middleware::from_fn(logging_middleware::log_request_response))
        .layer(Extension(shared.clone()))
        .layer({
            let origins: Vec<axum::http::HeaderValue> = cors_origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();

            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                ])
                .allow_credentials(true)
        })
        .layer(TraceLayer::new_for_http());

    // ========================================================================
    // SERVER STARTUP
    // ========================================================================

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
