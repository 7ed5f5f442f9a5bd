mod from_row;
pub mod queries;
mod schema;
mod scope;

pub use from_row::{FromRow, query_all, query_one};
pub use schema::{CONNECTION_PRAGMAS, SCHEMA_VERSION, init_db};
pub use scope::TenantScope;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::alerts::DeadLetterAlerter;
use crate::config::Config;
use crate::crypto::{EmailHasher, MasterKey, hash_secret};
use crate::error::{AppError, Result};
use crate::jwt::TenantTokenKey;
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::payments::SignatureVerifier;
use crate::queue::JobQueue;
use crate::validator::LicenseValidator;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Shared state handed to handlers, workers and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub signatures: Arc<SignatureVerifier>,
    /// Upper bound for answering a webhook delivery.
    pub webhook_budget: Duration,
    pub queue: Arc<JobQueue>,
    pub tenant_tokens: Arc<TenantTokenKey>,
    /// Hash of the operator API key. None disables the operator API.
    pub operator_key_hash: Option<String>,
    pub master_key: MasterKey,
    pub email_hasher: EmailHasher,
    pub validator: Arc<LicenseValidator>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    pub fn from_config(db: DbPool, config: &Config) -> Result<Self> {
        let notifier: Arc<dyn Notifier> = match &config.notification_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone(), config.master_key.clone())),
            None => Arc::new(LogNotifier),
        };

        Ok(Self {
            db,
            signatures: Arc::new(SignatureVerifier::new(
                config.webhook_secrets.clone(),
                config.webhook_tolerance_secs,
            )?),
            webhook_budget: config.webhook_response_budget,
            queue: Arc::new(JobQueue::new(
                config.queue.clone(),
                DeadLetterAlerter::new(config.dead_letter_alert_url.clone()),
            )),
            tenant_tokens: Arc::new(TenantTokenKey::from_secret(&config.tenant_token_secret)),
            operator_key_hash: config.operator_api_key.as_deref().map(hash_secret),
            master_key: config.master_key.clone(),
            email_hasher: config.email_hasher.clone(),
            validator: Arc::new(LicenseValidator::new(
                config.rate_limit.validation_rpm,
                config.validation.clone(),
                config.email_hasher.clone(),
            )),
            notifier,
        })
    }
}

/// File-backed pool with WAL, foreign keys and a busy timeout on every connection.
pub fn create_pool(database_path: &str) -> std::result::Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path)
        .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
    Pool::builder().max_size(10).build(manager)
}

/// Run synchronous SQLite work on the blocking thread pool.
pub async fn blocking<T, F>(pool: &DbPool, f: F) -> Result<T>
where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await
    .map_err(|e| AppError::Internal(format!("Blocking task failed: {}", e)))?
}
