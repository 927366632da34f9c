//! Session manager for the delegated-credential lifecycle
//!
//! Owns the single [`Session`] and drives every transition:
//! restore on startup, interactive connect, explicit disconnect and idle
//! expiry. Callers only ever see cloned snapshots.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::credential::{DelegationCredential, IdentityKind, Principal};
use super::error::{SessionError, describe_login_failure};
use super::provider::{
    IdentityProvider, IdentityProviderFactory, LoginError, LoginRequest, ProviderKey,
    ReadyProvider,
};
use super::state::{ConnectionState, Session, SessionInfo};
use super::watchdog::IdleWatchdog;
use crate::config::SessionConfig;

/// Result of a connect attempt that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected(Principal),
    /// The user closed the login flow; the session stays disconnected
    Cancelled,
}

struct Inner {
    factory: Box<dyn IdentityProviderFactory>,
    provider: OnceCell<Arc<dyn IdentityProvider>>,
    session: RwLock<Session>,
    /// Serializes state transitions
    transition: Mutex<()>,
    watchdog: IdleWatchdog,
    config: SessionConfig,
}

/// Handle to the delegated session
///
/// Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("principal", &self.principal())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager that builds its provider client on first use
    pub fn new(factory: impl IdentityProviderFactory + 'static, config: SessionConfig) -> Self {
        let watchdog = IdleWatchdog::new(config.idle_timeout());
        Self {
            inner: Arc::new(Inner {
                factory: Box::new(factory),
                provider: OnceCell::new(),
                session: RwLock::new(Session::default()),
                transition: Mutex::new(()),
                watchdog,
                config,
            }),
        }
    }

    /// Create a manager around an existing provider client
    pub fn with_provider(provider: Arc<dyn IdentityProvider>, config: SessionConfig) -> Self {
        Self::new(ReadyProvider(provider), config)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // ========== Snapshots ==========

    pub fn session(&self) -> Session {
        self.read().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.read().state
    }

    pub fn is_connected(&self) -> bool {
        self.read().is_connected()
    }

    pub fn principal(&self) -> Option<Principal> {
        self.read().principal.clone()
    }

    pub fn credential(&self) -> Option<DelegationCredential> {
        self.read().credential.clone()
    }

    pub fn info(&self) -> SessionInfo {
        self.read().info()
    }

    // ========== Transitions ==========

    /// Restore a still-valid delegation from the provider's own storage
    ///
    /// Never fails: any problem leaves the session disconnected and asks the
    /// provider to forget its stored credential.
    pub async fn initialize(&self) -> ConnectionState {
        let _guard = self.inner.transition.lock().await;

        if self.is_connected() {
            return ConnectionState::Connected;
        }
        self.write().state = ConnectionState::Initializing;

        match self.restore().await {
            Ok(Some(credential)) => {
                self.establish(credential);
                ConnectionState::Connected
            }
            Ok(None) => {
                debug!("No stored delegation to restore");
                self.reset();
                ConnectionState::Disconnected
            }
            Err(err) => {
                warn!(error = %err, "Could not restore session, clearing stored credential");
                self.logout_quietly().await;
                self.reset();
                ConnectionState::Disconnected
            }
        }
    }

    /// Run the login flow for `key` and establish a session
    ///
    /// A second call while one is running fails with
    /// [`SessionError::TransitionInProgress`]. Calling while connected returns
    /// the current principal.
    pub async fn connect(&self, key: ProviderKey) -> Result<ConnectOutcome, SessionError> {
        let _guard = self
            .inner
            .transition
            .try_lock()
            .map_err(|_| SessionError::TransitionInProgress)?;

        if let Some(principal) = self.connected_principal() {
            debug!(principal = %principal, "Already connected");
            return Ok(ConnectOutcome::Connected(principal));
        }

        self.write().state = ConnectionState::Connecting;
        info!(provider = %key, "Starting login");

        let provider = match self.provider().await {
            Ok(provider) => provider,
            Err(err) => {
                self.reset();
                return Err(err.into());
            }
        };

        let endpoint = self.inner.config.endpoint(key);
        let request = LoginRequest {
            provider: key,
            identity_provider_url: endpoint.endpoint_url.clone(),
            max_time_to_live: endpoint.max_credential_lifetime(),
            derivation_origin: endpoint.derivation_origin.clone(),
        };

        match provider.login(request).await {
            Ok(()) => {}
            Err(LoginError::Cancelled) => {
                info!(provider = %key, "Login cancelled by user");
                self.reset();
                return Ok(ConnectOutcome::Cancelled);
            }
            Err(LoginError::Failed(cause)) => {
                warn!(provider = %key, error = %cause, "Login failed");
                self.reset();
                return Err(SessionError::LoginFailed {
                    message: describe_login_failure(&cause),
                    cause,
                });
            }
        }

        let verified = match provider.identity().await {
            Ok(identity) => verify_identity(identity),
            Err(err) => Err(err.into()),
        };

        match verified {
            Ok(credential) => {
                let principal = credential.principal().clone();
                self.establish(credential);
                Ok(ConnectOutcome::Connected(principal))
            }
            Err(err) => {
                warn!(provider = %key, error = %err, "Login produced an unusable identity");
                self.logout_quietly().await;
                self.reset();
                Err(err)
            }
        }
    }

    /// End the session
    ///
    /// Provider logout is best effort; local state is always cleared.
    pub async fn disconnect(&self) {
        let _guard = self.inner.transition.lock().await;
        let principal = self.principal();
        self.teardown().await;
        info!(principal = ?principal.as_ref().map(Principal::as_str), "Session disconnected");
    }

    /// Record activity, postponing idle expiry
    ///
    /// No-op unless connected.
    pub fn touch(&self) {
        let mut session = self.write();
        if session.is_connected() {
            session.idle_deadline = Some(self.arm_watchdog());
        }
    }

    // ========== Internals ==========

    async fn provider(&self) -> Result<Arc<dyn IdentityProvider>, SessionError> {
        let provider = self
            .inner
            .provider
            .get_or_try_init(|| self.inner.factory.create())
            .await?;
        Ok(Arc::clone(provider))
    }

    async fn restore(&self) -> Result<Option<DelegationCredential>, SessionError> {
        let provider = self.provider().await?;
        if !provider.is_authenticated().await? {
            return Ok(None);
        }
        let identity = provider.identity().await?;
        verify_identity(identity).map(Some)
    }

    fn connected_principal(&self) -> Option<Principal> {
        let session = self.read();
        if session.is_connected() {
            session.principal.clone()
        } else {
            None
        }
    }

    fn establish(&self, credential: DelegationCredential) {
        let principal = credential.principal().clone();
        let mut session = self.write();
        session.state = ConnectionState::Connected;
        session.principal = Some(principal.clone());
        session.credential = Some(credential);
        session.connected_at = Some(Utc::now());
        session.idle_deadline = Some(self.arm_watchdog());
        info!(principal = %principal, "Session connected");
    }

    fn reset(&self) {
        self.inner.watchdog.cancel();
        self.write().clear(ConnectionState::Disconnected);
    }

    async fn teardown(&self) {
        self.inner.watchdog.cancel();
        self.write().state = ConnectionState::Disconnecting;
        self.logout_quietly().await;
        self.write().clear(ConnectionState::Disconnected);
    }

    async fn logout_quietly(&self) {
        if let Some(provider) = self.inner.provider.get() {
            if let Err(err) = provider.logout().await {
                warn!(error = %err, "Provider logout failed, clearing session anyway");
            }
        }
    }

    fn arm_watchdog(&self) -> Instant {
        let weak = Arc::downgrade(&self.inner);
        self.inner.watchdog.arm(move |generation| async move {
            if let Some(inner) = weak.upgrade() {
                SessionManager { inner }.expire(generation).await;
            }
        })
    }

    async fn expire(&self, generation: u64) {
        let _guard = self.inner.transition.lock().await;

        if self.inner.watchdog.generation() != generation || !self.is_connected() {
            debug!(generation, "Stale idle timer ignored");
            return;
        }

        let principal = self.principal();
        info!(
            principal = ?principal.as_ref().map(Principal::as_str),
            idle_timeout_ms = self.inner.config.idle_timeout_ms,
            "Session idle, disconnecting"
        );
        self.teardown().await;
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.inner
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Accept only a live delegation for a non-anonymous principal
pub fn verify_identity(identity: IdentityKind) -> Result<DelegationCredential, SessionError> {
    match identity {
        IdentityKind::Delegated(credential) => {
            if credential.principal().is_anonymous() {
                return Err(SessionError::AnonymousPrincipal);
            }
            if let Some(expiry) = credential.expires_at() {
                if expiry <= Utc::now() {
                    return Err(SessionError::DelegationExpired(expiry));
                }
            }
            Ok(credential)
        }
        other @ (IdentityKind::Anonymous | IdentityKind::Other(_)) => {
            Err(SessionError::NotDelegated(other.describe()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DelegationChain;
    use chrono::{DateTime, Duration};

    struct Chain {
        principal: Principal,
        expires_at: Option<DateTime<Utc>>,
    }

    impl DelegationChain for Chain {
        fn principal(&self) -> &Principal {
            &self.principal
        }

        fn to_json(&self) -> Result<serde_json::Value, SessionError> {
            Ok(serde_json::json!({}))
        }

        fn expires_at(&self) -> Option<DateTime<Utc>> {
            self.expires_at
        }
    }

    fn delegated(principal: Principal, expires_at: Option<DateTime<Utc>>) -> IdentityKind {
        IdentityKind::Delegated(DelegationCredential::new(Chain {
            principal,
            expires_at,
        }))
    }

    #[test]
    fn test_verify_accepts_live_delegation() {
        let principal = Principal::parse("aaaaa-aa").unwrap();
        let identity = delegated(principal.clone(), Some(Utc::now() + Duration::hours(1)));
        assert_eq!(verify_identity(identity).unwrap().principal(), &principal);
    }

    #[test]
    fn test_verify_rejects_anonymous_principal() {
        let identity = delegated(Principal::anonymous(), None);
        assert_eq!(
            verify_identity(identity).unwrap_err(),
            SessionError::AnonymousPrincipal
        );
    }

    #[test]
    fn test_verify_rejects_expired_delegation() {
        let expiry = Utc::now() - Duration::minutes(5);
        let identity = delegated(Principal::parse("aaaaa-aa").unwrap(), Some(expiry));
        assert_eq!(
            verify_identity(identity).unwrap_err(),
            SessionError::DelegationExpired(expiry)
        );
    }

    #[test]
    fn test_verify_rejects_non_delegated() {
        let err = verify_identity(IdentityKind::Other("Ed25519KeyIdentity".to_string()))
            .unwrap_err();
        assert!(matches!(err, SessionError::NotDelegated(_)));
        assert!(err.to_string().contains("Ed25519KeyIdentity"));

        let err = verify_identity(IdentityKind::Anonymous).unwrap_err();
        assert!(
            err.to_string()
                .to_lowercase()
                .contains("expected delegation identity")
        );
    }
}
