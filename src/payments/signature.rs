use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// How far a signature timestamp may run ahead of our clock.
const FUTURE_SKEW_SECS: i64 = 60;

/// Header carrying `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Verifies HMAC-SHA256 webhook signatures against one or more shared secrets.
pub struct SignatureVerifier {
    secrets: Vec<String>,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    pub fn new(secrets: Vec<String>, tolerance_secs: i64) -> Result<Self> {
        if secrets.is_empty() || secrets.iter().any(|s| s.is_empty()) {
            return Err(AppError::Internal("At least one webhook secret is required".into()));
        }
        Ok(Self {
            secrets,
            tolerance_secs,
        })
    }

    pub fn verify(&self, payload: &[u8], header: Option<&str>) -> Result<()> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    /// Every failure collapses into `InvalidSignature`; the cause is only logged.
    pub fn verify_at(&self, payload: &[u8], header: Option<&str>, now: i64) -> Result<()> {
        let Some(header) = header else {
            tracing::warn!(target: "security", "Webhook rejected: missing signature header");
            return Err(AppError::InvalidSignature);
        };

        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                candidates.push(s);
            }
        }

        let (Some(timestamp_str), false) = (timestamp, candidates.is_empty()) else {
            tracing::warn!(target: "security", "Webhook rejected: malformed signature header");
            return Err(AppError::InvalidSignature);
        };

        let Ok(timestamp) = timestamp_str.parse::<i64>() else {
            tracing::warn!(target: "security", "Webhook rejected: invalid signature timestamp");
            return Err(AppError::InvalidSignature);
        };

        let Some(age) = now.checked_sub(timestamp) else {
            tracing::warn!(target: "security", "Webhook rejected: signature timestamp out of range");
            return Err(AppError::InvalidSignature);
        };
        if age > self.tolerance_secs {
            tracing::warn!(
                target: "security",
                "Webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                self.tolerance_secs
            );
            return Err(AppError::InvalidSignature);
        }
        if age < -FUTURE_SKEW_SECS {
            tracing::warn!(target: "security", "Webhook rejected: timestamp in the future (age={}s)", age);
            return Err(AppError::InvalidSignature);
        }

        let provided: Vec<Vec<u8>> = candidates
            .iter()
            .filter_map(|c| hex::decode(c).ok())
            .collect();

        for secret in &self.secrets {
            let expected = compute(secret, timestamp_str, payload)?;
            // Length is not secret: always 32 bytes for SHA-256.
            if provided
                .iter()
                .any(|p| p.len() == expected.len() && bool::from(p.ct_eq(&expected)))
            {
                return Ok(());
            }
        }

        tracing::warn!(target: "security", "Webhook rejected: signature mismatch");
        Err(AppError::InvalidSignature)
    }
}

fn compute(secret: &str, timestamp: &str, payload: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("Invalid webhook secret".into()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Build a signature header the way a sender would.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String> {
    let t = timestamp.to_string();
    Ok(format!("t={},v1={}", t, hex::encode(compute(secret, &t, payload)?)))
}
