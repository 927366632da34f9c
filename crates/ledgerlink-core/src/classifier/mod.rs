//! Error classification
//!
//! Maps raw failures onto a small, stable taxonomy with user-facing messages:
//! - Structured token-service error codes are looked up first
//! - HTTP status codes are used when no code is present
//! - Message substrings are the last resort
//!
//! [`with_error_handling`] wraps an operation so that every failure reaching
//! the presentation layer is a [`ClassifiedError`].

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::session::SessionError;

/// Stable error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input, caught before any network call
    ValidationError,
    /// Delegation missing, expired or rejected
    AuthenticationError,
    /// Transport failure
    NetworkError,
    /// Request took too long
    TimeoutError,
    /// Upstream throttling
    RateLimitError,
    /// Balance too low for the requested operation
    InsufficientFundsError,
    /// Ledger or canister rejected the call
    BlockchainError,
    /// Anything else
    UnknownError,
}

impl ErrorKind {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "ValidationError",
            Self::AuthenticationError => "AuthenticationError",
            Self::NetworkError => "NetworkError",
            Self::TimeoutError => "TimeoutError",
            Self::RateLimitError => "RateLimitError",
            Self::InsufficientFundsError => "InsufficientFundsError",
            Self::BlockchainError => "BlockchainError",
            Self::UnknownError => "UnknownError",
        }
    }

    /// Fixed user-facing message for this kind
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::ValidationError => "Some of the information provided is invalid.",
            Self::AuthenticationError => {
                "Your session has expired or is not authorized. Please reconnect your wallet."
            }
            Self::NetworkError => "Unable to reach the network. Please check your connection.",
            Self::TimeoutError => "The request timed out. Please try again.",
            Self::RateLimitError => "Too many requests. Please wait a moment and try again.",
            Self::InsufficientFundsError => "Insufficient balance to complete this transaction.",
            Self::BlockchainError => "The ledger rejected the transaction. Please try again later.",
            Self::UnknownError => "An unexpected error occurred.",
        }
    }

    /// Whether failures of this kind stay failed until the user acts
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::ValidationError | Self::AuthenticationError | Self::InsufficientFundsError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failure normalized for the presentation layer
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    /// Diagnostic payload, never shown to users
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Known upstream codes, compared after stripping separators and case
const CODE_TABLE: &[(&str, ErrorKind, &str)] = &[
    ("INVALID_AMOUNT", ErrorKind::ValidationError, "Please enter a valid amount."),
    ("VALIDATION_ERROR", ErrorKind::ValidationError, "Some of the information provided is invalid."),
    ("INVALID_INPUT", ErrorKind::ValidationError, "Some of the information provided is invalid."),
    ("TOKEN_NOT_FOUND", ErrorKind::ValidationError, "The requested token does not exist."),
    ("BAD_FEE", ErrorKind::ValidationError, "The transaction fee is incorrect."),
    ("UNAUTHORIZED", ErrorKind::AuthenticationError, "You are not authorized. Please reconnect your wallet."),
    ("AUTHENTICATION_REQUIRED", ErrorKind::AuthenticationError, "Please connect your wallet to continue."),
    ("DELEGATION_EXPIRED", ErrorKind::AuthenticationError, "Your session has expired. Please reconnect your wallet."),
    ("INVALID_DELEGATION", ErrorKind::AuthenticationError, "Your session is invalid. Please reconnect your wallet."),
    ("INVALID_PRINCIPAL", ErrorKind::AuthenticationError, "Your identity could not be verified. Please reconnect your wallet."),
    ("PERMISSION_DENIED", ErrorKind::AuthenticationError, "You do not have permission to perform this action."),
    ("NETWORK_ERROR", ErrorKind::NetworkError, "Unable to reach the network. Please check your connection."),
    ("TIMEOUT", ErrorKind::TimeoutError, "The request timed out. Please try again."),
    ("REQUEST_TIMEOUT", ErrorKind::TimeoutError, "The request timed out. Please try again."),
    ("RATE_LIMITED", ErrorKind::RateLimitError, "Too many requests. Please wait a moment and try again."),
    ("TOO_MANY_REQUESTS", ErrorKind::RateLimitError, "Too many requests. Please wait a moment and try again."),
    ("INSUFFICIENT_FUNDS", ErrorKind::InsufficientFundsError, "Insufficient balance to complete this transaction."),
    ("INSUFFICIENT_BALANCE", ErrorKind::InsufficientFundsError, "Insufficient balance to complete this transaction."),
    ("CANISTER_ERROR", ErrorKind::BlockchainError, "The token canister returned an error. Please try again later."),
    ("CANISTER_REJECT", ErrorKind::BlockchainError, "The token canister rejected the call. Please try again later."),
    ("LEDGER_ERROR", ErrorKind::BlockchainError, "The ledger returned an error. Please try again later."),
    ("TRANSFER_FAILED", ErrorKind::BlockchainError, "The transfer could not be completed. Please try again later."),
    ("TX_TOO_OLD", ErrorKind::BlockchainError, "The transaction expired before reaching the ledger. Please try again."),
    ("TX_DUPLICATE", ErrorKind::BlockchainError, "This transaction was already submitted."),
];

/// Message fragments checked in order when nothing structured is available
const SUBSTRING_TABLE: &[(&[&str], ErrorKind)] = &[
    (&["insufficient"], ErrorKind::InsufficientFundsError),
    (
        &[
            "authentication",
            "unauthorized",
            "invalid principal",
            "delegation",
            "permission denied",
        ],
        ErrorKind::AuthenticationError,
    ),
    (&["timeout", "timed out"], ErrorKind::TimeoutError),
    (&["rate limit", "too many requests"], ErrorKind::RateLimitError),
    (&["network", "connection", "fetch", "dns"], ErrorKind::NetworkError),
    (&["canister", "ledger", "replica", "subnet"], ErrorKind::BlockchainError),
    (&["invalid", "validation"], ErrorKind::ValidationError),
];

fn normalize_code(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Look up a structured upstream code
pub fn lookup_code(code: &str) -> Option<(ErrorKind, &'static str)> {
    let wanted = normalize_code(code);
    CODE_TABLE
        .iter()
        .find(|(known, _, _)| normalize_code(known) == wanted)
        .map(|(_, kind, message)| (*kind, *message))
}

/// Codes that refuse the delegation itself rather than one action
const CREDENTIAL_CODES: &[&str] = &[
    "UNAUTHORIZED",
    "AUTHENTICATION_REQUIRED",
    "DELEGATION_EXPIRED",
    "INVALID_DELEGATION",
    "INVALID_PRINCIPAL",
];

/// Whether a service response means the session's credential is no good
///
/// A 403 or `PERMISSION_DENIED` only refuses the current action. Known codes
/// decide on their own; otherwise only a 401 counts.
pub fn rejects_credential(status: u16, code: Option<&str>) -> bool {
    match code.filter(|code| lookup_code(code).is_some()) {
        Some(code) => {
            let code = normalize_code(code);
            CREDENTIAL_CODES
                .iter()
                .any(|known| normalize_code(known) == code)
        }
        None => status == 401,
    }
}

/// Map an HTTP status to a kind
pub fn kind_for_status(status: u16) -> Option<ErrorKind> {
    match status {
        400 | 422 => Some(ErrorKind::ValidationError),
        401 | 403 => Some(ErrorKind::AuthenticationError),
        402 => Some(ErrorKind::InsufficientFundsError),
        408 | 504 => Some(ErrorKind::TimeoutError),
        429 => Some(ErrorKind::RateLimitError),
        502 | 503 => Some(ErrorKind::NetworkError),
        500..=599 => Some(ErrorKind::BlockchainError),
        _ => None,
    }
}

/// Match message fragments (case-insensitive)
pub fn kind_for_message(message: &str) -> Option<ErrorKind> {
    let lower = message.to_lowercase();
    SUBSTRING_TABLE
        .iter()
        .find(|(fragments, _)| fragments.iter().any(|f| lower.contains(*f)))
        .map(|(_, kind)| *kind)
}

/// Kind derived from structured data only (codes, statuses, variants)
///
/// Returns `None` when only the message text could tell.
pub fn structured_kind(error: &Error) -> Option<ErrorKind> {
    match error {
        Error::InvalidAmount(_) | Error::InvalidInput(_) => Some(ErrorKind::ValidationError),
        Error::WalletNotConnected | Error::AuthenticationExpired => {
            Some(ErrorKind::AuthenticationError)
        }
        Error::Session(
            SessionError::NotDelegated(_)
            | SessionError::AnonymousPrincipal
            | SessionError::DelegationExpired(_),
        ) => {
            Some(ErrorKind::AuthenticationError)
        }
        Error::NetworkError(e) if e.is_timeout() => Some(ErrorKind::TimeoutError),
        Error::NetworkError(_) => Some(ErrorKind::NetworkError),
        Error::Api { status, code, .. } => code
            .as_deref()
            .and_then(lookup_code)
            .map(|(kind, _)| kind)
            .or_else(|| kind_for_status(*status)),
        _ => None,
    }
}

/// Classify a bare message
pub fn classify_message(message: &str) -> ClassifiedError {
    match kind_for_message(message) {
        Some(kind) => ClassifiedError::new(kind, kind.default_message())
            .with_details(serde_json::json!({ "message": message })),
        None => ClassifiedError::new(ErrorKind::UnknownError, message),
    }
}

/// Normalize any crate error into the taxonomy
pub fn classify(error: &Error) -> ClassifiedError {
    match error {
        Error::InvalidAmount(_) | Error::InvalidInput(_) => {
            ClassifiedError::new(ErrorKind::ValidationError, error.to_string())
        }
        Error::WalletNotConnected | Error::AuthenticationExpired => {
            ClassifiedError::new(ErrorKind::AuthenticationError, error.to_string())
        }
        Error::Session(
            SessionError::NotDelegated(_)
            | SessionError::AnonymousPrincipal
            | SessionError::DelegationExpired(_),
        ) => {
            ClassifiedError::new(ErrorKind::AuthenticationError, error.to_string())
        }
        Error::NetworkError(e) => {
            let kind = if e.is_timeout() {
                ErrorKind::TimeoutError
            } else {
                ErrorKind::NetworkError
            };
            ClassifiedError::new(kind, kind.default_message())
                .with_details(serde_json::json!({ "message": e.to_string() }))
        }
        Error::Api {
            status,
            code,
            message,
            details,
        } => {
            let diagnostics = serde_json::json!({
                "status": status,
                "code": code,
                "message": message,
                "details": details,
            });

            if let Some((kind, fixed)) = code.as_deref().and_then(lookup_code) {
                return ClassifiedError::new(kind, fixed).with_details(diagnostics);
            }
            if let Some(kind) = kind_for_status(*status) {
                return ClassifiedError::new(kind, kind.default_message())
                    .with_details(diagnostics);
            }
            match kind_for_message(message) {
                Some(kind) => {
                    ClassifiedError::new(kind, kind.default_message()).with_details(diagnostics)
                }
                None => ClassifiedError::new(ErrorKind::UnknownError, message.clone())
                    .with_details(diagnostics),
            }
        }
        Error::Serialization(e) => ClassifiedError::new(
            ErrorKind::UnknownError,
            "Received an unexpected response from the token service.",
        )
        .with_details(serde_json::json!({ "message": e.to_string() })),
        _ => classify_message(&error.to_string()),
    }
}

/// Presentation-layer sink for classified failures
pub trait Notifier: Send + Sync {
    fn notify(&self, error: &ClassifiedError);
}

/// Notifier that reports through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, err: &ClassifiedError) {
        error!(kind = %err.kind, message = %err.message, details = ?err.details, "Operation failed");
    }
}

/// Run an operation, classifying and reporting any failure
///
/// Failures the caller is expected to handle itself (wallet not connected,
/// authentication expired) are classified but not reported.
pub async fn with_error_handling<T, F>(
    notifier: &dyn Notifier,
    operation: F,
) -> std::result::Result<T, ClassifiedError>
where
    F: Future<Output = Result<T>>,
{
    match operation.await {
        Ok(value) => Ok(value),
        Err(err) => {
            let classified = classify(&err);
            if err.is_handled_upstream() {
                debug!(kind = %classified.kind, "Error left to caller, not reported");
            } else {
                notifier.notify(&classified);
            }
            Err(classified)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<ClassifiedError>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, error: &ClassifiedError) {
            self.seen.lock().unwrap().push(error.clone());
        }
    }

    fn api_error(status: u16, code: Option<&str>, message: &str) -> Error {
        Error::Api {
            status,
            code: code.map(str::to_string),
            message: message.to_string(),
            details: None,
        }
    }

    #[test]
    fn test_code_lookup_ignores_case_and_separators() {
        assert_eq!(
            lookup_code("insufficient-funds").map(|(k, _)| k),
            Some(ErrorKind::InsufficientFundsError)
        );
        assert_eq!(
            lookup_code("InsufficientFunds").map(|(k, _)| k),
            Some(ErrorKind::InsufficientFundsError)
        );
        assert_eq!(lookup_code("SOMETHING_NEW"), None);
    }

    #[test]
    fn test_classify_prefers_code_over_status() {
        let classified = classify(&api_error(500, Some("INSUFFICIENT_FUNDS"), "trap"));
        assert_eq!(classified.kind, ErrorKind::InsufficientFundsError);
        assert_eq!(
            classified.message,
            "Insufficient balance to complete this transaction."
        );
        assert!(classified.details.is_some());
    }

    #[test]
    fn test_classify_by_status() {
        assert_eq!(
            classify(&api_error(401, None, "nope")).kind,
            ErrorKind::AuthenticationError
        );
        assert_eq!(
            classify(&api_error(429, None, "slow down")).kind,
            ErrorKind::RateLimitError
        );
        assert_eq!(
            classify(&api_error(504, None, "gateway")).kind,
            ErrorKind::TimeoutError
        );
        assert_eq!(
            classify(&api_error(500, None, "trap")).kind,
            ErrorKind::BlockchainError
        );
    }

    #[test]
    fn test_rejects_credential() {
        assert!(rejects_credential(401, None));
        assert!(rejects_credential(401, Some("SOMETHING_NEW")));
        assert!(rejects_credential(403, Some("delegation-expired")));
        assert!(rejects_credential(400, Some("INVALID_PRINCIPAL")));

        assert!(!rejects_credential(403, None));
        assert!(!rejects_credential(403, Some("PERMISSION_DENIED")));
        assert!(!rejects_credential(401, Some("PERMISSION_DENIED")));
        assert!(!rejects_credential(503, None));
    }

    #[test]
    fn test_unknown_code_falls_back_to_original_message() {
        let classified = classify(&api_error(409, Some("WEIRD"), "token symbol taken"));
        assert_eq!(classified.kind, ErrorKind::UnknownError);
        assert_eq!(classified.message, "token symbol taken");
    }

    #[test]
    fn test_classify_message_substrings() {
        assert_eq!(
            classify_message("Delegation has expired").kind,
            ErrorKind::AuthenticationError
        );
        assert_eq!(
            classify_message("request timed out after 30s").kind,
            ErrorKind::TimeoutError
        );
        assert_eq!(
            classify_message("Canister trapped").kind,
            ErrorKind::BlockchainError
        );
        let unknown = classify_message("something odd");
        assert_eq!(unknown.kind, ErrorKind::UnknownError);
        assert_eq!(unknown.message, "something odd");
    }

    #[test]
    fn test_validation_errors_keep_their_message() {
        let classified = classify(&Error::InvalidAmount("'abc' is not a number".to_string()));
        assert_eq!(classified.kind, ErrorKind::ValidationError);
        assert!(classified.message.contains("abc"));
    }

    #[test]
    fn test_structured_kind() {
        assert_eq!(
            structured_kind(&Error::WalletNotConnected),
            Some(ErrorKind::AuthenticationError)
        );
        assert_eq!(
            structured_kind(&api_error(418, None, "teapot")),
            None
        );
        assert_eq!(structured_kind(&Error::Other("x".to_string())), None);
    }

    #[tokio::test]
    async fn test_with_error_handling_passes_success_through() {
        let notifier = RecordingNotifier::default();
        let result = with_error_handling(&notifier, async { Ok::<_, Error>(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert!(notifier.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_with_error_handling_notifies() {
        let notifier = RecordingNotifier::default();
        let result: std::result::Result<(), _> =
            with_error_handling(&notifier, async { Err(api_error(429, None, "busy")) }).await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimitError);
        assert_eq!(notifier.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_with_error_handling_skips_upstream_errors() {
        let notifier = RecordingNotifier::default();
        let result: std::result::Result<(), _> =
            with_error_handling(&notifier, async { Err(Error::WalletNotConnected) }).await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthenticationError);
        assert!(err.message.contains("Wallet not connected"));
        assert!(notifier.seen.lock().unwrap().is_empty());
    }
}
