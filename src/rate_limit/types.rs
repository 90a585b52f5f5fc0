use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the shared limiter answers when the counter store cannot be reached
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request (availability over strictness)
    #[default]
    Open,
    /// Reject the request
    Closed,
}

impl FailurePolicy {
    /// The admission decision to use when the store call failed
    pub fn decision(self) -> bool {
        matches!(self, FailurePolicy::Open)
    }
}

/// How the prune/count/add/expire steps are sent to Redis
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WindowStrategy {
    /// Single Lua script, atomic per call
    #[default]
    Script,
    /// Plain pipeline, other callers may interleave between steps
    Pipeline,
}

/// Sliding window parameters shared by every counter store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    /// Length of the trailing window
    pub window: Duration,
    /// Expiry refreshed on the key after each attempt
    pub key_ttl: Duration,
}

impl WindowSpec {
    pub fn new(window: Duration, key_ttl: Duration) -> Self {
        Self { window, key_ttl }
    }
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            key_ttl: Duration::from_secs(60),
        }
    }
}

/// Outcome of a shared window check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDecision {
    /// The store answered and the count was below capacity
    Allowed { count: u64 },
    /// The store answered and the window is full
    Denied { count: u64 },
    /// The store failed; the failure policy decided
    Fallback { allowed: bool },
}

impl WindowDecision {
    pub fn is_allowed(&self) -> bool {
        match self {
            WindowDecision::Allowed { .. } => true,
            WindowDecision::Denied { .. } => false,
            WindowDecision::Fallback { allowed } => *allowed,
        }
    }
}

/// Build the Redis key for a resource identifier
pub fn window_key(prefix: &str, resource: &str) -> String {
    format!("{}{}", prefix, resource)
}
