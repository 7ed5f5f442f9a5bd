//! Per-IP rate limiting.
//!
//! License validation is throttled inside the validator so the limit applies
//! before any store access and the caller gets an accurate `Retry-After`.
//! The tenant API uses a `tower_governor` layer.
//!
//! Configure via environment variables:
//! - VALIDATION_RATE_LIMIT_PER_MINUTE (default: 20)
//! - TENANT_API_RATE_LIMIT_PER_MINUTE (default: 60)
//!
//! A value of 0 disables the corresponding limit.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub validation_rpm: u32,
    pub tenant_api_rpm: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            validation_rpm: 20,
            tenant_api_rpm: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn disabled() -> Self {
        Self {
            validation_rpm: 0,
            tenant_api_rpm: 0,
        }
    }
}

pub type RateLimitLayer = GovernorLayer<
    tower_governor::key_extractor::PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
>;

/// Layer allowing a burst of `requests_per_minute`, refilled evenly over a minute.
/// Returns None when the limit is disabled.
pub fn standard_layer(requests_per_minute: u32) -> Option<RateLimitLayer> {
    if requests_per_minute == 0 {
        return None;
    }

    let period = Duration::from_millis((60_000 / requests_per_minute as u64).max(1));
    let config = GovernorConfigBuilder::default()
        .period(period)
        .burst_size(requests_per_minute)
        .finish()?;

    Some(GovernorLayer::new(Arc::new(config)))
}

type KeyedLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Keyed limiter for validation calls, one bucket per caller IP.
pub struct ValidationRateLimiter {
    limiter: Option<KeyedLimiter>,
    clock: DefaultClock,
}

impl ValidationRateLimiter {
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            limiter: NonZeroU32::new(requests_per_minute)
                .map(|rpm| RateLimiter::keyed(Quota::per_minute(rpm))),
            clock: DefaultClock::default(),
        }
    }

    pub fn check(&self, ip: IpAddr) -> Result<()> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        limiter.check_key(&ip).map_err(|not_until| {
            let wait = not_until.wait_time_from(self.clock.now());
            let retry_after_secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            tracing::warn!(target: "security", caller_ip = %ip, "Validation rate limit exceeded");
            AppError::RateLimited {
                retry_after_secs: retry_after_secs.max(1),
            }
        })
    }

    /// Drop buckets that are full again. Called from the cleanup task.
    pub fn retain_recent(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.limiter.as_ref().map_or(0, |l| l.len())
    }
}
