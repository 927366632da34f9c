//! Identity-provider boundary
//!
//! The session manager talks to identity providers only through these traits.
//! Adapters translate provider-native objects into [`IdentityKind`] and
//! provider-native login callbacks into a single awaitable result.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::credential::IdentityKind;
use super::error::ProviderError;
use crate::error::Error;

/// The fixed set of supported identity providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKey {
    InternetIdentity,
    Nfid,
}

impl ProviderKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InternetIdentity => "internet_identity",
            Self::Nfid => "nfid",
        }
    }

    pub fn all() -> [ProviderKey; 2] {
        [Self::InternetIdentity, Self::Nfid]
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "internet_identity" | "ii" => Ok(Self::InternetIdentity),
            "nfid" => Ok(Self::Nfid),
            other => Err(Error::InvalidInput(format!(
                "Unknown identity provider '{}'. Valid options: internet_identity, nfid",
                other
            ))),
        }
    }
}

/// Parameters handed to a provider's login flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub provider: ProviderKey,
    pub identity_provider_url: String,
    pub max_time_to_live: Duration,
    pub derivation_origin: Option<String>,
}

/// Outcome of a failed login flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    /// The user closed or aborted the flow
    Cancelled,
    /// Anything else, with the provider's message
    Failed(String),
}

impl LoginError {
    /// Build from a provider message, recognising user cancellation
    ///
    /// Only for adapters whose provider reports cancellation as text.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("userinterrupt")
            || lower.contains("user interrupt")
            || lower.contains("cancelled by user")
            || lower.contains("canceled by user")
            || lower.contains("window closed")
        {
            Self::Cancelled
        } else {
            Self::Failed(message)
        }
    }
}

/// Client of one identity provider
///
/// Owns whatever persistence the provider needs; the session manager only
/// asks whether a valid credential exists and tells it to log out.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Whether a previously stored credential is still valid
    async fn is_authenticated(&self) -> Result<bool, ProviderError>;

    /// The current identity
    async fn identity(&self) -> Result<IdentityKind, ProviderError>;

    /// Run the login flow until it succeeds, fails or is cancelled
    async fn login(&self, request: LoginRequest) -> Result<(), LoginError>;

    /// Clear the stored credential
    async fn logout(&self) -> Result<(), ProviderError>;
}

/// Creates the provider client on first use
#[async_trait]
pub trait IdentityProviderFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn IdentityProvider>, ProviderError>;
}

/// Factory for a client that already exists
pub struct ReadyProvider(pub Arc<dyn IdentityProvider>);

#[async_trait]
impl IdentityProviderFactory for ReadyProvider {
    async fn create(&self) -> Result<Arc<dyn IdentityProvider>, ProviderError> {
        Ok(Arc::clone(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_key_parse() {
        assert_eq!(
            "internet-identity".parse::<ProviderKey>().unwrap(),
            ProviderKey::InternetIdentity
        );
        assert_eq!("NFID".parse::<ProviderKey>().unwrap(), ProviderKey::Nfid);
        assert!("google".parse::<ProviderKey>().is_err());
    }

    #[test]
    fn test_provider_key_round_trip() {
        for key in ProviderKey::all() {
            assert_eq!(key.as_str().parse::<ProviderKey>().unwrap(), key);
        }
    }

    #[test]
    fn test_login_error_from_message() {
        assert_eq!(LoginError::from_message("UserInterrupt"), LoginError::Cancelled);
        assert_eq!(
            LoginError::from_message("Login window closed"),
            LoginError::Cancelled
        );
        assert_eq!(
            LoginError::from_message("Failed to fetch"),
            LoginError::Failed("Failed to fetch".to_string())
        );
    }
}
