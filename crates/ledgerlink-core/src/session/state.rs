//! Session state and snapshots

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::credential::{DelegationCredential, Principal};

/// Connection state of the delegated session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Uninitialized,
    Initializing,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
        }
    }

    /// Whether a transition is currently running
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Initializing | Self::Connecting | Self::Disconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The delegated session
///
/// `state == Connected` exactly when `credential` is set and belongs to a
/// non-anonymous delegated principal.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub state: ConnectionState,
    pub principal: Option<Principal>,
    pub credential: Option<DelegationCredential>,
    /// When the idle watchdog will end the session
    pub idle_deadline: Option<Instant>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Drop the credential and principal, keeping the object
    pub(crate) fn clear(&mut self, state: ConnectionState) {
        self.state = state;
        self.principal = None;
        self.credential = None;
        self.idle_deadline = None;
        self.connected_at = None;
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            state: self.state,
            principal: self.principal.clone(),
            connected_at: self.connected_at,
            expires_at: self.credential.as_ref().and_then(|c| c.expires_at()),
            idle_remaining_secs: self
                .idle_deadline
                .map(|deadline| deadline.saturating_duration_since(Instant::now()).as_secs()),
        }
    }
}

/// Serializable summary of a session, without the credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub state: ConnectionState,
    pub principal: Option<Principal>,
    pub connected_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub idle_remaining_secs: Option<u64>,
}
