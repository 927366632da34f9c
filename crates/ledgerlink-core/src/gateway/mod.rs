//! Authenticated request gateway
//!
//! Layers the session on top of the plain [`ApiClient`]: while connected,
//! [`AuthGateway::get_client`] hands out a handle that signs every call with
//! the delegation; otherwise callers get the base handle.

pub mod client;

pub use client::{ApiClient, ApiHandle, AuthorizedCall, Authorization, REQUEST_ID_HEADER};

use chrono::Utc;
use tracing::warn;

use crate::error::{Error, Result};
use crate::session::SessionManager;

#[derive(Debug, Clone)]
pub struct AuthGateway {
    session: SessionManager,
    client: ApiClient,
}

impl AuthGateway {
    pub fn new(session: SessionManager, client: ApiClient) -> Self {
        Self { session, client }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Handle for the current session state
    ///
    /// Never fails: if the credential cannot be serialized the base handle
    /// is returned and the problem is logged.
    pub fn get_client(&self) -> ApiHandle {
        let Some(credential) = self.session.credential().filter(|_| self.session.is_connected())
        else {
            return self.client.handle();
        };

        match Authorization::from_credential(&credential) {
            Ok(authorization) => self.client.authenticated(authorization),
            Err(err) => {
                warn!(
                    principal = %credential.principal(),
                    error = %err,
                    "Could not derive authorization header, using unauthenticated client"
                );
                self.client.handle()
            }
        }
    }

    /// Unauthenticated handle for read-only calls
    pub fn base_client(&self) -> ApiHandle {
        self.client.handle()
    }

    /// Authenticated handle, or why there is none
    ///
    /// Checked before any mutating call touches the network.
    pub fn require_connected(&self) -> Result<ApiHandle> {
        if !self.session.is_connected() {
            return Err(Error::WalletNotConnected);
        }

        let expired = self
            .session
            .credential()
            .is_none_or(|credential| credential.is_expired(Utc::now()));
        if expired {
            return Err(Error::AuthenticationExpired);
        }

        let handle = self.get_client();
        if !handle.is_authenticated() {
            return Err(Error::AuthenticationExpired);
        }
        Ok(handle)
    }
}
