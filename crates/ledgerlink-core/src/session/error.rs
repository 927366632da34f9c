//! Session error types

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure reported by an identity-provider adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors raised by session transitions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Expected delegation identity, got {0}")]
    NotDelegated(String),

    #[error("Anonymous principal cannot be used for a session. Log in with an identity provider.")]
    AnonymousPrincipal,

    #[error("Delegation expired at {0}")]
    DelegationExpired(DateTime<Utc>),

    #[error("Invalid delegation: {0}")]
    InvalidDelegation(String),

    /// Login failed; `message` is user-facing, `cause` is the provider's text
    #[error("{message}")]
    LoginFailed { message: String, cause: String },

    #[error("A connection attempt is already in progress")]
    TransitionInProgress,

    #[error("Identity provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Turn a raw login failure into a human-readable message
pub fn describe_login_failure(cause: &str) -> String {
    let lower = cause.to_lowercase();

    if contains_any(&lower, &["timeout", "timed out"]) {
        "The identity provider did not respond in time. Please try again.".to_string()
    } else if contains_any(&lower, &["network", "fetch", "connection", "offline"]) {
        "Network error during login. Check your connection and try again.".to_string()
    } else if contains_any(&lower, &["malformed", "format", "parse", "certificate", "signature"]) {
        "The identity provider returned an invalid response. Please try again.".to_string()
    } else if contains_any(&lower, &["canister", "replica", "subnet", "unavailable", "internal"]) {
        "The identity service is temporarily unavailable. Please try again later.".to_string()
    } else {
        format!("Login failed: {}", cause)
    }
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}
