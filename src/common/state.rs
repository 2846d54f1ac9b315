// Application state shared across all modules

use reqwest::Client;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::auth::session::SessionIssuer;
use crate::billing::catalog::ProductCatalog;
use crate::billing::gateway::PaymentGateway;
use crate::common::config::AppConfig;
use crate::services::email::EmailSender;

/// Application state containing database pool, collaborators, and configuration
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    pub http: Client,
    pub sessions: Arc<SessionIssuer>,
    pub email_sender: Arc<dyn EmailSender>,
    pub payment_gateway: Arc<dyn PaymentGateway>,
    pub catalog: Arc<ProductCatalog>,
}
