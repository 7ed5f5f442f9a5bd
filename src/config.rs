use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::crypto::{EmailHasher, MasterKey};
use crate::queue::{QueueConfig, RetryPolicy};
use crate::rate_limit::RateLimitConfig;
use crate::validator::ValidationPolicy;
use crate::worker::WorkerConfig;

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub dev_mode: bool,
    /// Accepted webhook signing secrets. More than one allows rotation.
    pub webhook_secrets: Vec<String>,
    pub webhook_tolerance_secs: i64,
    pub webhook_response_budget: Duration,
    pub tenant_token_secret: String,
    pub operator_api_key: Option<String>,
    pub master_key: MasterKey,
    pub email_hasher: EmailHasher,
    pub rate_limit: RateLimitConfig,
    pub validation: ValidationPolicy,
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub expiry_sweep_interval: Duration,
    pub job_retention_days: i64,
    pub validation_retention_days: i64,
    pub dead_letter_alert_url: Option<String>,
    pub notification_webhook_url: Option<String>,
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Secrets are optional in dev mode, where a random value is used for the
/// lifetime of the process.
fn required_secret(key: &str, dev_mode: bool, generate: impl FnOnce() -> String) -> Result<String, String> {
    match non_empty(key) {
        Some(v) => Ok(v),
        None if dev_mode => {
            tracing::warn!("{} not set, using an ephemeral value (dev mode)", key);
            Ok(generate())
        }
        None => Err(format!("{} must be set outside dev mode", key)),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("LICENSEHOOK_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let webhook_secrets: Vec<String> = match non_empty("WEBHOOK_SECRETS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => vec![required_secret("WEBHOOK_SECRETS", dev_mode, || {
                hex::encode(EmailHasher::generate_key())
            })?],
        };

        let tenant_token_secret = required_secret("TENANT_TOKEN_SECRET", dev_mode, || {
            hex::encode(EmailHasher::generate_key())
        })?;

        let master_key = MasterKey::from_base64(&required_secret(
            "MASTER_KEY",
            dev_mode,
            MasterKey::generate,
        )?)
        .map_err(|e| format!("MASTER_KEY: {}", e))?;

        let email_hasher = match non_empty("EMAIL_HMAC_KEY") {
            Some(encoded) => {
                EmailHasher::from_encoded(&encoded).map_err(|e| format!("EMAIL_HMAC_KEY: {}", e))?
            }
            None if dev_mode => EmailHasher::from_bytes(EmailHasher::generate_key()),
            None => return Err("EMAIL_HMAC_KEY must be set outside dev mode".into()),
        };

        let queue = QueueConfig {
            max_attempts: parse_env("JOB_MAX_ATTEMPTS", 5u32).max(1),
            lease_secs: parse_env("JOB_LEASE_SECS", 30i64).max(1),
            retry: RetryPolicy::default(),
        };

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_env("PORT", 3000),
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "licensehook.db".to_string()),
            dev_mode,
            webhook_secrets,
            webhook_tolerance_secs: parse_env("WEBHOOK_TIMESTAMP_TOLERANCE_SECS", 300),
            webhook_response_budget: Duration::from_millis(parse_env(
                "WEBHOOK_RESPONSE_BUDGET_MS",
                2000,
            )),
            tenant_token_secret,
            operator_api_key: non_empty("OPERATOR_API_KEY"),
            master_key,
            email_hasher,
            rate_limit: RateLimitConfig {
                validation_rpm: parse_env("VALIDATION_RATE_LIMIT_PER_MINUTE", 20),
                tenant_api_rpm: parse_env("TENANT_API_RATE_LIMIT_PER_MINUTE", 60),
            },
            validation: ValidationPolicy {
                trial_validates: parse_env("TRIAL_VALIDATES", true),
            },
            worker: WorkerConfig {
                concurrency: parse_env("WORKER_CONCURRENCY", 4usize).max(1),
                poll_interval: Duration::from_millis(parse_env("WORKER_POLL_INTERVAL_MS", 500)),
            },
            queue,
            expiry_sweep_interval: Duration::from_secs(
                parse_env("EXPIRY_SWEEP_INTERVAL_SECS", 300u64).max(1),
            ),
            job_retention_days: parse_env("JOB_RETENTION_DAYS", 30),
            validation_retention_days: parse_env("VALIDATION_RETENTION_DAYS", 90),
            dead_letter_alert_url: non_empty("DEAD_LETTER_ALERT_URL"),
            notification_webhook_url: non_empty("NOTIFICATION_WEBHOOK_URL"),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
