//! Imported delegation provider
//!
//! An [`IdentityProvider`] for environments without a browser: the login
//! flow consumes a delegation chain document that was produced elsewhere
//! (the JSON shape agent-js writes for `DelegationChain`, plus the
//! delegated `principal`). The document is checked for shape, hex fields,
//! expiry and lifetime, then kept in a [`DelegationStore`] so that a later
//! process can restore it.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::credential::{DelegationChain, DelegationCredential, IdentityKind, Principal};
use super::error::{ProviderError, SessionError};
use super::provider::{IdentityProvider, LoginError, LoginRequest};

/// One link of a delegation chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    /// DER public key of the delegate, hex
    pub pubkey: String,
    /// Expiry in nanoseconds since the epoch, hex
    pub expiration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedDelegation {
    pub delegation: Delegation,
    /// Signature over the delegation, hex
    pub signature: String,
}

/// Delegation chain document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationDocument {
    pub principal: Principal,
    /// DER public key of the root identity, hex
    pub public_key: String,
    pub delegations: Vec<SignedDelegation>,
}

impl DelegationDocument {
    /// Parse and check a document
    pub fn parse(text: &str) -> Result<Self, SessionError> {
        let document: DelegationDocument = serde_json::from_str(text)
            .map_err(|e| SessionError::InvalidDelegation(e.to_string()))?;
        document.validate()?;
        Ok(document)
    }

    fn validate(&self) -> Result<(), SessionError> {
        Principal::parse(self.principal.as_str())
            .map_err(|e| SessionError::InvalidDelegation(e.to_string()))?;
        decode_hex("publicKey", &self.public_key)?;

        for (index, signed) in self.delegations.iter().enumerate() {
            decode_hex(
                &format!("delegations[{}].delegation.pubkey", index),
                &signed.delegation.pubkey,
            )?;
            decode_hex(
                &format!("delegations[{}].signature", index),
                &signed.signature,
            )?;
            parse_expiration(&signed.delegation.expiration)?;
        }
        Ok(())
    }

    /// Earliest expiry across the chain
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.delegations
            .iter()
            .filter_map(|signed| parse_expiration(&signed.delegation.expiration).ok())
            .min()
    }

    pub fn to_json_string(&self) -> Result<String, SessionError> {
        serde_json::to_string(self).map_err(|e| SessionError::InvalidDelegation(e.to_string()))
    }
}

impl DelegationChain for DelegationDocument {
    fn principal(&self) -> &Principal {
        &self.principal
    }

    fn to_json(&self) -> Result<serde_json::Value, SessionError> {
        serde_json::to_value(self).map_err(|e| SessionError::InvalidDelegation(e.to_string()))
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiry()
    }
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, SessionError> {
    let bytes = hex::decode(value)
        .map_err(|e| SessionError::InvalidDelegation(format!("{} is not valid hex: {}", field, e)))?;
    if bytes.is_empty() {
        return Err(SessionError::InvalidDelegation(format!("{} is empty", field)));
    }
    Ok(bytes)
}

fn parse_expiration(value: &str) -> Result<DateTime<Utc>, SessionError> {
    let digits = value.trim_start_matches("0x");
    let nanos = u64::from_str_radix(digits, 16)
        .ok()
        .and_then(|n| i64::try_from(n).ok())
        .ok_or_else(|| {
            SessionError::InvalidDelegation(format!("expiration '{}' is not a hex timestamp", value))
        })?;
    Ok(DateTime::from_timestamp_nanos(nanos))
}

/// Where an imported delegation is kept between processes
#[async_trait]
pub trait DelegationStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>, ProviderError>;
    async fn save(&self, document: &str) -> Result<(), ProviderError>;
    async fn clear(&self) -> Result<(), ProviderError>;
}

/// In-memory store, lost with the process
#[derive(Debug, Default)]
pub struct MemoryDelegationStore {
    document: Mutex<Option<String>>,
}

impl MemoryDelegationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: impl Into<String>) -> Self {
        Self {
            document: Mutex::new(Some(document.into())),
        }
    }
}

#[async_trait]
impl DelegationStore for MemoryDelegationStore {
    async fn load(&self) -> Result<Option<String>, ProviderError> {
        Ok(self
            .document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn save(&self, document: &str) -> Result<(), ProviderError> {
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = Some(document.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<(), ProviderError> {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

/// Identity provider whose login imports a staged delegation document
pub struct ImportedDelegationProvider {
    store: Arc<dyn DelegationStore>,
    staged: Mutex<Option<String>>,
}

impl ImportedDelegationProvider {
    pub fn new(store: Arc<dyn DelegationStore>) -> Self {
        Self {
            store,
            staged: Mutex::new(None),
        }
    }

    /// Stage a document for the next login
    pub fn stage(&self, document: impl Into<String>) {
        *self.staged.lock().unwrap_or_else(PoisonError::into_inner) = Some(document.into());
    }

    async fn stored(&self) -> Result<Option<DelegationDocument>, ProviderError> {
        match self.store.load().await? {
            Some(text) => DelegationDocument::parse(&text)
                .map(Some)
                .map_err(|e| ProviderError::new(format!("Stored delegation is unusable: {}", e))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl IdentityProvider for ImportedDelegationProvider {
    async fn is_authenticated(&self) -> Result<bool, ProviderError> {
        Ok(match self.stored().await? {
            Some(document) => !document.is_expired(Utc::now()),
            None => false,
        })
    }

    async fn identity(&self) -> Result<IdentityKind, ProviderError> {
        let Some(document) = self.stored().await? else {
            return Ok(IdentityKind::Anonymous);
        };
        if document.delegations.is_empty() {
            return Ok(IdentityKind::Other(format!(
                "key identity {} without delegations",
                document.principal
            )));
        }
        Ok(IdentityKind::Delegated(DelegationCredential::new(document)))
    }

    async fn login(&self, request: LoginRequest) -> Result<(), LoginError> {
        let staged = self
            .staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| LoginError::Failed("No delegation document staged for import".to_string()))?;

        let document = DelegationDocument::parse(&staged)
            .map_err(|e| LoginError::Failed(format!("Malformed delegation document: {}", e)))?;

        let now = Utc::now();
        if let Some(expiry) = document.expiry() {
            if expiry <= now {
                return Err(LoginError::Failed(format!(
                    "Delegation expired at {}",
                    expiry.to_rfc3339()
                )));
            }
            let lifetime = (expiry - now).to_std().unwrap_or_default();
            if lifetime > request.max_time_to_live {
                return Err(LoginError::Failed(format!(
                    "Delegation lifetime of {}s exceeds the {}s allowed for {}",
                    lifetime.as_secs(),
                    request.max_time_to_live.as_secs(),
                    request.provider
                )));
            }
        }

        let normalized = document
            .to_json_string()
            .map_err(|e| LoginError::Failed(e.to_string()))?;
        self.store
            .save(&normalized)
            .await
            .map_err(|e| LoginError::Failed(e.to_string()))?;

        info!(
            principal = %document.principal,
            provider = %request.provider,
            identity_provider = %request.identity_provider_url,
            "Imported delegation"
        );
        Ok(())
    }

    async fn logout(&self) -> Result<(), ProviderError> {
        debug!("Clearing stored delegation");
        self.store.clear().await
    }
}
