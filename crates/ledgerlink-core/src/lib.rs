//! Ledgerlink Core Library
//!
//! This crate provides the core functionality for Ledgerlink, including:
//! - Delegated sessions (connect, restore, idle expiry, disconnect)
//! - Authenticated request gateway for the Token Service API
//! - Retry with exponential backoff and failure classification
//! - Exact decimal to base-unit amount codec
//! - Token Service and ICP ledger operations

pub mod amount;
pub mod classifier;
pub mod config;
pub mod error;
pub mod gateway;
pub mod infrastructure;
pub mod operations;
pub mod retry;
pub mod session;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::amount::AmountUnits;
    pub use crate::classifier::{ClassifiedError, ErrorKind};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::gateway::AuthGateway;
    pub use crate::operations::{Executor, IcpLedger, TokenService};
    pub use crate::session::{ConnectionState, ProviderKey, SessionManager};
}
