//! licensehook - turns signed payment webhooks into tenant licenses.
//!
//! Webhooks are verified, recorded once in an idempotency ledger and turned
//! into durable jobs. Workers apply the jobs to a per-tenant license state
//! machine; client applications validate keys against the result.

pub mod alerts;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod licensing;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod pagination;
pub mod payments;
pub mod queue;
pub mod rate_limit;
pub mod tasks;
pub mod util;
pub mod validator;
pub mod worker;
