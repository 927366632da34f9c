//! Error types for Ledgerlink

use thiserror::Error;

use crate::session::SessionError;

/// Result type alias using Ledgerlink's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Ledgerlink error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Input errors (E001-E099)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Session errors (E100-E199)
    #[error("Wallet not connected. Run `ledgerlink connect` before submitting transactions.")]
    WalletNotConnected,

    #[error("Authentication expired. Reconnect with `ledgerlink connect`.")]
    AuthenticationExpired,

    #[error(transparent)]
    Session(#[from] SessionError),

    // Network errors (E200-E299)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("Token service error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
        details: Option<serde_json::Value>,
    },

    // Config errors (E300-E399)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "E001",
            Self::InvalidInput(_) => "E002",
            Self::WalletNotConnected => "E100",
            Self::AuthenticationExpired => "E101",
            Self::Session(_) => "E102",
            Self::NetworkError(_) => "E200",
            Self::Api { .. } => "E201",
            Self::ConfigError(_) => "E300",
            Self::Serialization(_) | Self::Other(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::InvalidAmount(_) => {
                Some("Use a plain decimal such as 12.5 (up to 8 fractional digits)".to_string())
            }
            Self::WalletNotConnected | Self::AuthenticationExpired => {
                Some("ledgerlink connect --import <delegation.json>".to_string())
            }
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::ConfigError(_) => Some("ledgerlink config list".to_string()),
            _ => None,
        }
    }

    /// Whether this error should already have been surfaced by the caller
    ///
    /// These errors prompt a reconnect rather than an error notification.
    pub fn is_handled_upstream(&self) -> bool {
        let message = self.to_string().to_lowercase();
        message.contains("wallet not connected") || message.contains("authentication expired")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_amount_error() {
        let error = Error::InvalidAmount("abc".to_string());
        assert_eq!(error.code(), "E001");
        assert!(error.suggestion().is_some());
        assert!(error.to_string().contains("abc"));
    }

    #[test]
    fn test_wallet_not_connected_is_handled_upstream() {
        let error = Error::WalletNotConnected;
        assert_eq!(error.code(), "E100");
        assert!(error.is_handled_upstream());
        assert!(Error::AuthenticationExpired.is_handled_upstream());
    }

    #[test]
    fn test_api_error_display() {
        let error = Error::Api {
            status: 409,
            code: Some("INSUFFICIENT_FUNDS".to_string()),
            message: "balance too low".to_string(),
            details: None,
        };
        assert_eq!(error.code(), "E201");
        assert_eq!(error.to_string(), "Token service error (409): balance too low");
        assert!(!error.is_handled_upstream());
    }

    #[test]
    fn test_other_error_has_no_suggestion() {
        let error = Error::Other("boom".to_string());
        assert_eq!(error.code(), "E9999");
        assert_eq!(error.suggestion(), None);
    }
}
