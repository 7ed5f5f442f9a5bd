//! License validation for client applications.
//!
//! Callers present a license key (and optionally the purchaser email). Every
//! call that gets past the rate limiter leaves a validation attempt row, keyed
//! by the key prefix only.

use std::net::IpAddr;

use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::crypto::{EmailHasher, hash_secret, key_prefix};
use crate::db::queries;
use crate::error::Result;
use crate::models::{FeatureMatrix, License, LicenseStatus};
use crate::rate_limit::ValidationRateLimiter;

#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    /// Whether trial licenses count as valid.
    pub trial_validates: bool,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            trial_validates: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationRequest {
    pub license_key: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// Unknown key, or a key whose purchaser email does not match.
    NotFound,
    Inactive(LicenseStatus),
    Expired,
}

impl DenialReason {
    pub fn code(&self) -> String {
        match self {
            DenialReason::NotFound => "not_found".to_string(),
            DenialReason::Inactive(status) => format!("inactive:{}", status),
            DenialReason::Expired => "expired".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Valid(License),
    Denied(DenialReason),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid(_))
    }

    fn result_code(&self) -> String {
        match self {
            ValidationOutcome::Valid(_) => "valid".to_string(),
            ValidationOutcome::Denied(reason) => reason.code(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ValidationResponse {
    Valid {
        valid: bool,
        plan: String,
        features: FeatureMatrix,
        expires_at: Option<i64>,
        key_prefix: String,
    },
    Invalid {
        valid: bool,
        reason: String,
    },
}

impl From<ValidationOutcome> for ValidationResponse {
    fn from(outcome: ValidationOutcome) -> Self {
        match outcome {
            ValidationOutcome::Valid(license) => ValidationResponse::Valid {
                valid: true,
                plan: license.plan,
                features: license.features,
                expires_at: license.expires_at,
                key_prefix: license.key_prefix,
            },
            ValidationOutcome::Denied(reason) => ValidationResponse::Invalid {
                valid: false,
                reason: reason.code(),
            },
        }
    }
}

pub struct LicenseValidator {
    limiter: ValidationRateLimiter,
    policy: ValidationPolicy,
    email_hasher: EmailHasher,
}

impl LicenseValidator {
    pub fn new(requests_per_minute: u32, policy: ValidationPolicy, email_hasher: EmailHasher) -> Self {
        Self {
            limiter: ValidationRateLimiter::per_minute(requests_per_minute),
            policy,
            email_hasher,
        }
    }

    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }

    /// Validate a key. Throttled callers get `AppError::RateLimited` before any
    /// query runs and leave no attempt row.
    pub fn validate(
        &self,
        conn: &mut Connection,
        request: &ValidationRequest,
        caller_ip: Option<IpAddr>,
        now: i64,
    ) -> Result<ValidationOutcome> {
        if let Some(ip) = caller_ip {
            self.limiter.check(ip)?;
        }

        let key = request.license_key.trim();
        let prefix = (!key.is_empty()).then(|| key_prefix(key));

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let license = if key.is_empty() {
            None
        } else {
            queries::get_license_by_key_hash(&tx, &hash_secret(key))?
        };

        let outcome = match &license {
            None => ValidationOutcome::Denied(DenialReason::NotFound),
            Some(license) if !self.email_matches(license, request.email.as_deref()) => {
                ValidationOutcome::Denied(DenialReason::NotFound)
            }
            Some(license) => self.evaluate(license, now),
        };

        let caller = caller_ip.map(|ip| ip.to_string());
        queries::insert_validation_attempt(
            &tx,
            license.as_ref().map(|l| l.id.as_str()),
            prefix.as_deref(),
            caller.as_deref(),
            &outcome.result_code(),
            now,
        )?;

        let outcome = match outcome {
            ValidationOutcome::Valid(mut license) => {
                queries::record_successful_validation(&tx, &license.id, now)?;
                license.validation_count += 1;
                license.last_validated_at = Some(now);
                ValidationOutcome::Valid(license)
            }
            denied => denied,
        };
        tx.commit()?;

        tracing::info!(
            key_prefix = prefix.as_deref().unwrap_or(""),
            caller_ip = caller.as_deref().unwrap_or("unknown"),
            result = %outcome.result_code(),
            "License validation"
        );
        Ok(outcome)
    }

    fn email_matches(&self, license: &License, email: Option<&str>) -> bool {
        match email.map(str::trim).filter(|e| !e.is_empty()) {
            None => true,
            Some(email) => license.customer_email_hash.as_deref() == Some(self.email_hasher.hash(email).as_str()),
        }
    }

    /// Expiry is judged against `now`, so an overdue license is denied even
    /// before the sweep has marked it expired.
    fn evaluate(&self, license: &License, now: i64) -> ValidationOutcome {
        let denied = match license.status {
            LicenseStatus::Active => None,
            LicenseStatus::Trial if self.policy.trial_validates => None,
            LicenseStatus::Expired => Some(DenialReason::Expired),
            status => Some(DenialReason::Inactive(status)),
        };

        match denied {
            Some(reason) => ValidationOutcome::Denied(reason),
            None if license.is_past_expiry(now) => ValidationOutcome::Denied(DenialReason::Expired),
            None => ValidationOutcome::Valid(license.clone()),
        }
    }
}
