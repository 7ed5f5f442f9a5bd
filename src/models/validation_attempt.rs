use serde::{Deserialize, Serialize};

/// Append-only audit row written for every validation call that reaches the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationAttempt {
    pub id: i64,
    /// None when the key matched no license.
    pub license_id: Option<String>,
    pub key_prefix: Option<String>,
    pub caller_ip: Option<String>,
    /// `valid` or a denial code such as `inactive:suspended`.
    pub result: String,
    pub timestamp: i64,
}
