//! Principals, delegation credentials and the identity variants a provider
//! can hand back.

use std::fmt;
use std::sync::{Arc, LazyLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::SessionError;
use crate::error::{Error, Result};

/// Textual form of the anonymous principal
pub const ANONYMOUS_PRINCIPAL: &str = "2vxsx-fae";

static PRINCIPAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z2-7]{1,5}(-[a-z2-7]{1,5})*$").expect("principal pattern is valid")
});

/// Stable identifier of an authenticated entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Parse and validate the textual (dash-grouped base32) form
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if !PRINCIPAL_PATTERN.is_match(text) {
            return Err(Error::InvalidInput(format!(
                "'{}' is not a valid principal",
                text
            )));
        }
        Ok(Self(text.to_string()))
    }

    pub fn anonymous() -> Self {
        Self(ANONYMOUS_PRINCIPAL.to_string())
    }

    pub fn is_anonymous(&self) -> bool {
        self.0 == ANONYMOUS_PRINCIPAL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-native signed delegation
///
/// Implemented by provider adapters; the session layer only needs the
/// principal, a JSON projection and the expiry.
pub trait DelegationChain: Send + Sync {
    fn principal(&self) -> &Principal;

    /// Transportable JSON form of the chain
    fn to_json(&self) -> std::result::Result<serde_json::Value, SessionError>;

    /// Earliest expiry in the chain, if the chain carries one
    fn expires_at(&self) -> Option<DateTime<Utc>>;

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expiry| expiry <= now)
    }
}

/// A delegation held by a connected session
#[derive(Clone)]
pub struct DelegationCredential {
    chain: Arc<dyn DelegationChain>,
}

impl DelegationCredential {
    pub fn new(chain: impl DelegationChain + 'static) -> Self {
        Self {
            chain: Arc::new(chain),
        }
    }

    pub fn from_arc(chain: Arc<dyn DelegationChain>) -> Self {
        Self { chain }
    }

    pub fn principal(&self) -> &Principal {
        self.chain.principal()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.chain.expires_at()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.chain.is_expired(now)
    }

    pub fn to_json(&self) -> std::result::Result<serde_json::Value, SessionError> {
        self.chain.to_json()
    }

    /// Value for the `Authorization` header: `Delegation <base64(json)>`
    pub fn authorization_value(&self) -> std::result::Result<String, SessionError> {
        let json = self.to_json()?;
        let encoded = BASE64_STANDARD.encode(json.to_string());
        Ok(format!("Delegation {}", encoded))
    }
}

impl fmt::Debug for DelegationCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegationCredential")
            .field("principal", self.principal())
            .field("expires_at", &self.expires_at())
            .finish_non_exhaustive()
    }
}

/// What a provider reports after login or restore
#[derive(Debug, Clone)]
pub enum IdentityKind {
    /// A delegated identity with its credential
    Delegated(DelegationCredential),
    /// No credential, or the anonymous identity
    Anonymous,
    /// Some other identity type, described for diagnostics
    Other(String),
}

impl IdentityKind {
    pub fn describe(&self) -> String {
        match self {
            Self::Delegated(credential) => format!("delegated identity {}", credential.principal()),
            Self::Anonymous => "anonymous identity".to_string(),
            Self::Other(description) => description.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    struct FixedChain {
        principal: Principal,
        expires_at: Option<DateTime<Utc>>,
    }

    impl DelegationChain for FixedChain {
        fn principal(&self) -> &Principal {
            &self.principal
        }

        fn to_json(&self) -> std::result::Result<serde_json::Value, SessionError> {
            Ok(serde_json::json!({ "principal": self.principal }))
        }

        fn expires_at(&self) -> Option<DateTime<Utc>> {
            self.expires_at
        }
    }

    #[test]
    fn test_principal_parse() {
        let principal = Principal::parse("rrkah-fqaaa-aaaaa-aaaaq-cai").unwrap();
        assert_eq!(principal.as_str(), "rrkah-fqaaa-aaaaa-aaaaq-cai");
        assert!(!principal.is_anonymous());

        assert!(Principal::parse("Not A Principal").is_err());
        assert!(Principal::parse("").is_err());
        assert!(Principal::parse("abc--def").is_err());
    }

    #[test]
    fn test_anonymous_principal() {
        assert!(Principal::anonymous().is_anonymous());
        assert!(Principal::parse(ANONYMOUS_PRINCIPAL).unwrap().is_anonymous());
    }

    #[test]
    fn test_credential_expiry() {
        let now = Utc::now();
        let credential = DelegationCredential::new(FixedChain {
            principal: Principal::parse("aaaaa-aa").unwrap(),
            expires_at: Some(now - Duration::minutes(1)),
        });
        assert!(credential.is_expired(now));

        let credential = DelegationCredential::new(FixedChain {
            principal: Principal::parse("aaaaa-aa").unwrap(),
            expires_at: None,
        });
        assert!(!credential.is_expired(now));
    }

    #[test]
    fn test_authorization_value() {
        let credential = DelegationCredential::new(FixedChain {
            principal: Principal::parse("aaaaa-aa").unwrap(),
            expires_at: None,
        });

        let value = credential.authorization_value().unwrap();
        let encoded = value.strip_prefix("Delegation ").unwrap();
        let decoded = BASE64_STANDARD.decode(encoded).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(json["principal"], "aaaaa-aa");
    }

    #[test]
    fn test_debug_redacts_chain() {
        let credential = DelegationCredential::new(FixedChain {
            principal: Principal::parse("aaaaa-aa").unwrap(),
            expires_at: None,
        });
        let debug = format!("{:?}", credential);
        assert!(debug.contains("aaaaa-aa"));
        assert!(!debug.contains("chain"));
    }
}
