//! Operation facade
//!
//! Named Token Service and ICP ledger operations. Each one:
//! - validates its input before any network traffic
//! - requires a connected session if it mutates state
//! - runs under the retry budget for its call family
//! - reports failures as [`ClassifiedError`]

pub mod icp;
pub mod tokens;
pub mod types;

pub use icp::IcpLedger;
pub use tokens::TokenService;
pub use types::{
    Balance, CreateTokenRequest, IcpBalance, IcpTransferReceipt, SyncStatus, TokenInfo,
    TransactionRecord, TransferReceipt,
};

use std::future::Future;
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::amount::{self, AmountUnits};
use crate::classifier::{self, ClassifiedError, Notifier, TracingNotifier};
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::gateway::{ApiHandle, AuthGateway};
use crate::retry::RetryPolicy;

/// Shared plumbing behind every operation
#[derive(Clone)]
pub struct Executor {
    gateway: AuthGateway,
    retry: RetryConfig,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("gateway", &self.gateway)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Executor {
    pub fn new(gateway: AuthGateway, retry: RetryConfig) -> Self {
        Self {
            gateway,
            retry,
            notifier: Arc::new(TracingNotifier),
        }
    }

    /// Report failures somewhere other than the log
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn gateway(&self) -> &AuthGateway {
        &self.gateway
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Classify and report the outcome of `operation`
    pub async fn handle<T>(
        &self,
        operation: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, ClassifiedError> {
        classifier::with_error_handling(self.notifier.as_ref(), operation).await
    }

    /// Run a state-changing call with the authenticated handle
    ///
    /// All attempts share one request id. The session is checked again before
    /// every attempt, so a session that ends during backoff stops the retries.
    /// An authentication failure from the service ends the session.
    pub async fn mutate<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn(ApiHandle, Uuid) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let request_id = Uuid::new_v4();
        let gateway = &self.gateway;
        let operation = &operation;

        let result = self
            .retry
            .mutation
            .run(move || async move {
                let handle = gateway.require_connected()?;
                operation(handle, request_id).await
            })
            .await;

        match result {
            Ok(value) => {
                self.gateway.session().touch();
                Ok(value)
            }
            Err(Error::AuthenticationExpired) => {
                self.gateway.session().disconnect().await;
                Err(Error::AuthenticationExpired)
            }
            Err(err) if rejected_credential(&err) => {
                warn!(
                    request_id = %request_id,
                    error = %err,
                    "Token service rejected the delegation, ending session"
                );
                self.gateway.session().disconnect().await;
                Err(Error::AuthenticationExpired)
            }
            Err(err) => Err(err),
        }
    }

    /// Run a read-only call with the unauthenticated handle
    ///
    /// A successful read still counts as activity for a connected session.
    pub async fn read<T, F, Fut>(&self, policy: RetryPolicy, operation: F) -> Result<T>
    where
        F: Fn(ApiHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let handle = self.gateway.base_client();
        let value = policy.run(|| operation(handle.clone())).await?;
        self.gateway.session().touch();
        Ok(value)
    }
}

fn rejected_credential(err: &Error) -> bool {
    match err {
        Error::Api { status, code, .. } => {
            classifier::rejects_credential(*status, code.as_deref())
        }
        _ => false,
    }
}

/// Encode a user amount, rejecting zero
pub(crate) fn positive_amount(decimal: &str) -> Result<AmountUnits> {
    let units = amount::encode(decimal.trim())?;
    if units.is_zero() {
        return Err(Error::InvalidAmount(
            "Amount must be greater than zero".to_string(),
        ));
    }
    Ok(units)
}

/// Check an identifier that will be placed in a URL path
pub(crate) fn path_segment<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid {
        return Err(Error::InvalidInput(format!(
            "{} '{}' may only contain letters, digits, '-', '_' and '.'",
            field, value
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_amount() {
        assert_eq!(
            positive_amount(" 1.5 ").unwrap(),
            AmountUnits::from(150_000_000u64)
        );
        assert!(matches!(
            positive_amount("0.000"),
            Err(Error::InvalidAmount(_))
        ));
        assert!(matches!(positive_amount("-2"), Err(Error::InvalidAmount(_))));
    }

    #[test]
    fn test_path_segment() {
        assert_eq!(path_segment("token id", " tok-1 ").unwrap(), "tok-1");
        assert!(path_segment("token id", "").is_err());
        assert!(path_segment("token id", "../admin").is_err());
        assert!(path_segment("token id", "a b").is_err());
    }

    #[test]
    fn test_rejected_credential_only_for_service_errors() {
        let unauthorized = Error::Api {
            status: 401,
            code: None,
            message: "no".to_string(),
            details: None,
        };
        assert!(rejected_credential(&unauthorized));
        assert!(!rejected_credential(&Error::WalletNotConnected));
        assert!(!rejected_credential(&Error::Api {
            status: 503,
            code: None,
            message: "down".to_string(),
            details: None,
        }));
        assert!(!rejected_credential(&Error::Api {
            status: 403,
            code: Some("PERMISSION_DENIED".to_string()),
            message: "not the token owner".to_string(),
            details: None,
        }));
    }
}
