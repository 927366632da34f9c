//! OS keyring storage for imported delegations
//!
//! Keeps the delegation chain document in the operating system's
//! credential store (macOS Keychain, Windows Credential Manager, Linux
//! Secret Service) so a later process can restore the session.

use async_trait::async_trait;
use keyring::Entry;

use crate::session::{DelegationStore, ProviderError};

/// Service name used for keyring storage
const KEYRING_SERVICE: &str = "ledgerlink";

/// Default username for the delegation entry
const KEYRING_USER: &str = "delegation-chain";

/// OS keyring-based delegation store
#[derive(Debug, Clone)]
pub struct KeyringDelegationStore {
    service: String,
    user: String,
}

impl Default for KeyringDelegationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringDelegationStore {
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
            user: KEYRING_USER.to_string(),
        }
    }

    /// Store under custom service/user names, e.g. one entry per profile
    pub fn with_names(service: &str, user: &str) -> Self {
        Self {
            service: service.to_string(),
            user: user.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry, ProviderError> {
        Entry::new(&self.service, &self.user)
            .map_err(|e| ProviderError::new(format!("Failed to create keyring entry: {}", e)))
    }
}

fn join_error(e: tokio::task::JoinError) -> ProviderError {
    ProviderError::new(format!("Task join error: {}", e))
}

#[async_trait]
impl DelegationStore for KeyringDelegationStore {
    async fn load(&self) -> Result<Option<String>, ProviderError> {
        let entry = self.entry()?;

        // keyring calls block
        let result = tokio::task::spawn_blocking(move || entry.get_password())
            .await
            .map_err(join_error)?;

        match result {
            Ok(document) => Ok(Some(document)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(ProviderError::new(format!(
                "Failed to read delegation from keyring: {}",
                e
            ))),
        }
    }

    async fn save(&self, document: &str) -> Result<(), ProviderError> {
        let entry = self.entry()?;
        let document = document.to_string();

        tokio::task::spawn_blocking(move || {
            entry.set_password(&document).map_err(|e| {
                ProviderError::new(format!("Failed to store delegation in keyring: {}", e))
            })
        })
        .await
        .map_err(join_error)?
    }

    async fn clear(&self) -> Result<(), ProviderError> {
        let entry = self.entry()?;

        tokio::task::spawn_blocking(move || match entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(ProviderError::new(format!(
                "Failed to remove delegation from keyring: {}",
                e
            ))),
        })
        .await
        .map_err(join_error)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Needs a running secret service
    #[tokio::test]
    #[ignore = "Requires OS keyring access"]
    async fn test_keyring_store_round_trip() {
        let store = KeyringDelegationStore::with_names("ledgerlink-test", "test-delegation");
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());

        store.save("{\"principal\":\"aaaaa-aa\"}").await.unwrap();
        assert_eq!(
            store.load().await.unwrap().as_deref(),
            Some("{\"principal\":\"aaaaa-aa\"}")
        );

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }
}
