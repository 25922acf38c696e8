use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a single attempt through a proxy ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Destination answered; the response goes back to the caller
    Success,
    /// Proxy unreachable, connection dropped or timed out
    TransportFailure,
    /// Destination blocked this proxy (403)
    Blocked,
    /// Destination is rate limiting the pool (429/503)
    RateLimited,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::TransportFailure => "transport_failure",
            AttemptOutcome::Blocked => "blocked",
            AttemptOutcome::RateLimited => "rate_limited",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One proxied attempt of a logical request, broadcast to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub proxy_address: String,
    pub method: String,
    pub requested_url: String,
    pub outcome: AttemptOutcome,
    pub status_code: Option<u16>,
    pub response_time: u64,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}
