//! Delegated session
//!
//! Holds a time-boxed delegation obtained from an identity provider and
//! tracks whether it may be used to authorize requests:
//! - [`SessionManager`] drives connect, restore, idle expiry and disconnect
//! - [`IdentityProvider`] is the seam to the provider client
//! - [`ImportedDelegationProvider`] imports delegation documents produced elsewhere

pub mod credential;
pub mod error;
pub mod imported;
pub mod manager;
pub mod provider;
pub mod state;
pub mod watchdog;

pub use credential::{
    ANONYMOUS_PRINCIPAL, DelegationChain, DelegationCredential, IdentityKind, Principal,
};
pub use error::{ProviderError, SessionError, describe_login_failure};
pub use imported::{
    DelegationDocument, DelegationStore, ImportedDelegationProvider, MemoryDelegationStore,
};
pub use manager::{ConnectOutcome, SessionManager, verify_identity};
pub use provider::{
    IdentityProvider, IdentityProviderFactory, LoginError, LoginRequest, ProviderKey,
    ReadyProvider,
};
pub use state::{ConnectionState, Session, SessionInfo};
pub use watchdog::IdleWatchdog;
